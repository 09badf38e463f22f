pub mod access_control;
pub mod request_id;

pub use access_control::{attach_viewer, get_current_viewer, require_superuser, require_user};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
