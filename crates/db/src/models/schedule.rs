use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} is still referenced by the schedule")]
    Protected(&'static str),
}

fn map_protected(what: &'static str) -> impl FnOnce(sqlx::Error) -> ScheduleError {
    move |err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            ScheduleError::Protected(what)
        }
        _ => ScheduleError::Database(err),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Day {
    pub id: i64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Venue {
    pub id: i64,
    pub order: i64,
    pub name: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct Slot {
    pub id: i64,
    pub previous_slot_id: Option<i64>,
    pub day_id: Option<i64>,
    pub name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateSlot {
    pub previous_slot_id: Option<i64>,
    pub day_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, TS)]
#[ts(export)]
pub struct ScheduleItem {
    pub id: i64,
    pub venue_id: i64,
    pub talk_id: Option<i64>,
    pub details: String,
    pub notes: String,
    pub css_class: String,
    /// Title of the linked talk, if any.
    pub talk_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct CreateScheduleItem {
    pub venue_id: i64,
    pub talk_id: Option<i64>,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub css_class: String,
    #[serde(default)]
    pub slot_ids: Vec<i64>,
}

impl Day {
    pub async fn create(pool: &SqlitePool, date: NaiveDate) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Day>("INSERT INTO schedule_days (date) VALUES (?) RETURNING id, date")
            .bind(date)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Day>("SELECT id, date FROM schedule_days WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Day>("SELECT id, date FROM schedule_days ORDER BY date")
            .fetch_all(pool)
            .await
    }

    /// Fails with `Protected` while a slot still sits on this day.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), ScheduleError> {
        let result = sqlx::query("DELETE FROM schedule_days WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_protected("Day"))?;
        if result.rows_affected() == 0 {
            return Err(ScheduleError::NotFound("Day"));
        }
        Ok(())
    }
}

impl Venue {
    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        order: i64,
        notes: &str,
        day_ids: &[i64],
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let venue = sqlx::query_as::<_, Venue>(
            r#"INSERT INTO schedule_venues ("order", name, notes) VALUES (?, ?, ?)
               RETURNING id, "order", name, notes"#,
        )
        .bind(order)
        .bind(name)
        .bind(notes)
        .fetch_one(&mut *tx)
        .await?;
        for day_id in day_ids {
            sqlx::query("INSERT INTO schedule_venue_days (venue_id, day_id) VALUES (?, ?)")
                .bind(venue.id)
                .bind(day_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(venue)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Venue>(
            r#"SELECT id, "order", name, notes FROM schedule_venues WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_day(pool: &SqlitePool, day_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Venue>(
            r#"SELECT v.id, v."order", v.name, v.notes
                 FROM schedule_venues v
                 JOIN schedule_venue_days vd ON vd.venue_id = v.id
                WHERE vd.day_id = ?
                ORDER BY v."order", v.name"#,
        )
        .bind(day_id)
        .fetch_all(pool)
        .await
    }

    /// Fails with `Protected` while a schedule item still uses the venue.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<(), ScheduleError> {
        let result = sqlx::query("DELETE FROM schedule_venues WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_protected("Venue"))?;
        if result.rows_affected() == 0 {
            return Err(ScheduleError::NotFound("Venue"));
        }
        Ok(())
    }
}

/// Slots chained through `previous_slot_id` longer than this are treated as unresolved.
const MAX_SLOT_CHAIN: usize = 64;

impl Slot {
    pub async fn create(pool: &SqlitePool, data: &CreateSlot) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Slot>(
            r#"INSERT INTO schedule_slots (previous_slot_id, day_id, name, start_time, end_time)
               VALUES (?, ?, ?, ?, ?)
               RETURNING id, previous_slot_id, day_id, name, start_time, end_time"#,
        )
        .bind(data.previous_slot_id)
        .bind(data.day_id)
        .bind(&data.name)
        .bind(data.start_time)
        .bind(data.end_time)
        .fetch_one(pool)
        .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Slot>(
            "SELECT id, previous_slot_id, day_id, name, start_time, end_time
               FROM schedule_slots ORDER BY id",
        )
        .fetch_all(pool)
        .await
    }

    /// Own start time, or the end time of the previous slot.
    pub fn resolved_start(&self, slots: &HashMap<i64, Slot>) -> Option<NaiveTime> {
        if self.start_time.is_some() {
            return self.start_time;
        }
        self.previous_slot_id
            .and_then(|prev| slots.get(&prev))
            .map(|prev| prev.end_time)
    }

    /// Own day, or the day of the nearest predecessor that has one.
    pub fn resolved_day(&self, slots: &HashMap<i64, Slot>) -> Option<i64> {
        let mut current = self;
        for _ in 0..MAX_SLOT_CHAIN {
            if current.day_id.is_some() {
                return current.day_id;
            }
            current = slots.get(&current.previous_slot_id?)?;
        }
        None
    }
}

impl ScheduleItem {
    pub async fn create(pool: &SqlitePool, data: &CreateScheduleItem) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO schedule_items (venue_id, talk_id, details, notes, css_class)
               VALUES (?, ?, ?, ?, ?)
               RETURNING id"#,
        )
        .bind(data.venue_id)
        .bind(data.talk_id)
        .bind(&data.details)
        .bind(&data.notes)
        .bind(&data.css_class)
        .fetch_one(&mut *tx)
        .await?;
        for slot_id in &data.slot_ids {
            sqlx::query("INSERT INTO schedule_item_slots (item_id, slot_id) VALUES (?, ?)")
                .bind(id)
                .bind(slot_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleItem>(
            r#"SELECT i.id, i.venue_id, i.talk_id, i.details, i.notes, i.css_class,
                      t.title AS talk_title
                 FROM schedule_items i
                 LEFT JOIN talks t ON t.talk_id = i.talk_id
                WHERE i.id = ?"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleItem>(
            r#"SELECT i.id, i.venue_id, i.talk_id, i.details, i.notes, i.css_class,
                      t.title AS talk_title
                 FROM schedule_items i
                 LEFT JOIN talks t ON t.talk_id = i.talk_id
                ORDER BY i.id"#,
        )
        .fetch_all(pool)
        .await
    }

    /// `(item_id, slot_id)` placements.
    pub async fn slot_links(pool: &SqlitePool) -> Result<Vec<(i64, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT item_id, slot_id FROM schedule_item_slots ORDER BY item_id, slot_id",
        )
        .fetch_all(pool)
        .await
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ScheduledSlot {
    pub slot: Slot,
    pub start_time: Option<NaiveTime>,
    pub items: Vec<ScheduleItem>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ScheduleDay {
    pub day: Day,
    pub venues: Vec<Venue>,
    pub slots: Vec<ScheduledSlot>,
}

/// Days in date order, each with its venues and its slots ordered by start time.
pub async fn load_schedule(pool: &SqlitePool) -> Result<Vec<ScheduleDay>, sqlx::Error> {
    let days = Day::list_all(pool).await?;
    let slots: HashMap<i64, Slot> = Slot::list_all(pool)
        .await?
        .into_iter()
        .map(|slot| (slot.id, slot))
        .collect();
    let items: HashMap<i64, ScheduleItem> = ScheduleItem::list_all(pool)
        .await?
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

    let mut items_by_slot: HashMap<i64, Vec<ScheduleItem>> = HashMap::new();
    for (item_id, slot_id) in ScheduleItem::slot_links(pool).await? {
        if let Some(item) = items.get(&item_id) {
            items_by_slot.entry(slot_id).or_default().push(item.clone());
        }
    }

    let mut schedule = Vec::with_capacity(days.len());
    for day in days {
        let venues = Venue::list_for_day(pool, day.id).await?;
        let mut day_slots: Vec<ScheduledSlot> = slots
            .values()
            .filter(|slot| slot.resolved_day(&slots) == Some(day.id))
            .map(|slot| ScheduledSlot {
                slot: slot.clone(),
                start_time: slot.resolved_start(&slots),
                items: items_by_slot.get(&slot.id).cloned().unwrap_or_default(),
            })
            .collect();
        day_slots.sort_by_key(|s| (s.start_time, s.slot.end_time, s.slot.id));
        schedule.push(ScheduleDay {
            day,
            venues,
            slots: day_slots,
        });
    }
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        talk::TalkStatus,
        test_utils::{create_test_talk, setup_test_pool},
    };

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn schedule_groups_slots_by_day_and_follows_previous_slots() {
        let pool = setup_test_pool().await;
        let day = Day::create(&pool, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap())
            .await
            .unwrap();
        let venue = Venue::create(&pool, "Main hall", 1, "", &[day.id])
            .await
            .unwrap();
        let first = Slot::create(
            &pool,
            &CreateSlot {
                previous_slot_id: None,
                day_id: Some(day.id),
                name: "Opening".into(),
                start_time: Some(time(9, 0)),
                end_time: time(10, 0),
            },
        )
        .await
        .unwrap();
        let second = Slot::create(
            &pool,
            &CreateSlot {
                previous_slot_id: Some(first.id),
                day_id: None,
                name: String::new(),
                start_time: None,
                end_time: time(11, 0),
            },
        )
        .await
        .unwrap();
        let talk = create_test_talk(&pool, "Keynote", TalkStatus::Accepted, "speaker").await;
        ScheduleItem::create(
            &pool,
            &CreateScheduleItem {
                venue_id: venue.id,
                talk_id: Some(talk.talk_id),
                slot_ids: vec![second.id],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let schedule = load_schedule(&pool).await.unwrap();
        assert_eq!(schedule.len(), 1);
        let day_view = &schedule[0];
        assert_eq!(day_view.venues, vec![venue]);
        assert_eq!(day_view.slots.len(), 2);
        assert_eq!(day_view.slots[0].slot.id, first.id);
        assert_eq!(day_view.slots[1].start_time, Some(time(10, 0)));
        assert_eq!(
            day_view.slots[1].items[0].talk_title.as_deref(),
            Some("Keynote")
        );
    }

    #[tokio::test]
    async fn referenced_venue_and_day_are_protected() {
        let pool = setup_test_pool().await;
        let day = Day::create(&pool, NaiveDate::from_ymd_opt(2026, 8, 2).unwrap())
            .await
            .unwrap();
        let venue = Venue::create(&pool, "Room B", 2, "", &[day.id]).await.unwrap();
        Slot::create(
            &pool,
            &CreateSlot {
                previous_slot_id: None,
                day_id: Some(day.id),
                name: String::new(),
                start_time: Some(time(14, 0)),
                end_time: time(15, 0),
            },
        )
        .await
        .unwrap();
        ScheduleItem::create(
            &pool,
            &CreateScheduleItem {
                venue_id: venue.id,
                details: "BoF".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            Venue::delete(&pool, venue.id).await,
            Err(ScheduleError::Protected("Venue"))
        ));
        assert!(matches!(
            Day::delete(&pool, day.id).await,
            Err(ScheduleError::Protected("Day"))
        ));
        assert!(matches!(
            Venue::delete(&pool, 999).await,
            Err(ScheduleError::NotFound("Venue"))
        ));
    }

    #[test]
    fn slot_chain_without_day_stays_unresolved() {
        let a = Slot {
            id: 1,
            previous_slot_id: Some(2),
            day_id: None,
            name: String::new(),
            start_time: None,
            end_time: time(10, 0),
        };
        let b = Slot {
            id: 2,
            previous_slot_id: Some(1),
            ..a.clone()
        };
        let slots: HashMap<i64, Slot> = [(1, a.clone()), (2, b)].into_iter().collect();
        assert_eq!(a.resolved_day(&slots), None);
        assert_eq!(a.resolved_start(&slots), Some(time(10, 0)));
    }
}
