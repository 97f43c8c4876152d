//! Gamification ledger: one profile row per user

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::diesel_schema::gamification_profiles;
use super::models::{NewProfile, ProfileChanges, ProfileRow};
use crate::clock::{format_date, format_timestamp, parse_date, parse_timestamp};
use crate::config::RewardConfig;
use crate::engine::{DailyGoalState, GamificationProfile, HeartState, StreakState};
use crate::error::ProgressError;

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl From<ProfileRow> for GamificationProfile {
    fn from(row: ProfileRow) -> Self {
        let hearts_updated_at = parse_timestamp(&row.hearts_updated_at).unwrap_or_else(Utc::now);
        GamificationProfile {
            total_xp: row.total_xp.max(0),
            hearts: HeartState {
                current: to_u32(row.hearts),
                updated_at: hearts_updated_at,
            },
            streak: StreakState {
                current: to_u32(row.streak_current),
                longest: to_u32(row.streak_longest),
                last_active: row.streak_last_active.as_deref().and_then(parse_date),
            },
            daily_goal: DailyGoalState {
                target_xp: to_u32(row.daily_goal_xp),
                xp_today: to_u32(row.daily_xp_today),
                date: row.daily_goal_date.as_deref().and_then(parse_date),
            },
            utc_offset_minutes: row.utc_offset_minutes,
            version: row.version,
            user_id: row.user_id,
        }
    }
}

pub fn get_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<GamificationProfile>, ProgressError> {
    Ok(gamification_profiles::table
        .filter(gamification_profiles::user_id.eq(user_id))
        .select(ProfileRow::as_select())
        .first::<ProfileRow>(conn)
        .optional()?
        .map(Into::into))
}

/// Stored profile, or a fresh unsaved one (`version == 0`)
pub fn get_or_new(
    conn: &mut SqliteConnection,
    user_id: &str,
    rewards: &RewardConfig,
    now: DateTime<Utc>,
) -> Result<GamificationProfile, ProgressError> {
    Ok(get_profile(conn, user_id)?
        .unwrap_or_else(|| GamificationProfile::new(user_id, rewards, now)))
}

/// Insert (version 0) or version-checked update; returns the stored version
pub fn save_profile(
    conn: &mut SqliteConnection,
    profile: &GamificationProfile,
    now: DateTime<Utc>,
) -> Result<i64, ProgressError> {
    let now_text = format_timestamp(now);

    if profile.version == 0 {
        diesel::insert_into(gamification_profiles::table)
            .values(&NewProfile {
                user_id: profile.user_id.clone(),
                total_xp: profile.total_xp,
                hearts: to_i32(profile.hearts.current),
                hearts_updated_at: format_timestamp(profile.hearts.updated_at),
                streak_current: to_i32(profile.streak.current),
                streak_longest: to_i32(profile.streak.longest),
                streak_last_active: profile.streak.last_active.map(format_date),
                daily_goal_xp: to_i32(profile.daily_goal.target_xp),
                daily_xp_today: to_i32(profile.daily_goal.xp_today),
                daily_goal_date: profile.daily_goal.date.map(format_date),
                utc_offset_minutes: profile.utc_offset_minutes,
                created_at: now_text.clone(),
                updated_at: now_text,
                version: 1,
            })
            .execute(conn)?;
        return Ok(1);
    }

    let next_version = profile.version + 1;
    let updated = diesel::update(
        gamification_profiles::table
            .filter(gamification_profiles::user_id.eq(&profile.user_id))
            .filter(gamification_profiles::version.eq(profile.version)),
    )
    .set(&ProfileChanges {
        total_xp: profile.total_xp,
        hearts: to_i32(profile.hearts.current),
        hearts_updated_at: format_timestamp(profile.hearts.updated_at),
        streak_current: to_i32(profile.streak.current),
        streak_longest: to_i32(profile.streak.longest),
        streak_last_active: profile.streak.last_active.map(format_date),
        daily_goal_xp: to_i32(profile.daily_goal.target_xp),
        daily_xp_today: to_i32(profile.daily_goal.xp_today),
        daily_goal_date: profile.daily_goal.date.map(format_date),
        utc_offset_minutes: profile.utc_offset_minutes,
        updated_at: now_text,
        version: next_version,
    })
    .execute(conn)?;

    if updated == 0 {
        return Err(ProgressError::Conflict(format!(
            "profile {} changed since version {}",
            profile.user_id, profile.version
        )));
    }
    Ok(next_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProgressDb;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_new_profile_round_trip() {
        let db = ProgressDb::open_in_memory().unwrap();
        let rewards = RewardConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

        db.with_conn(|conn| {
            let mut profile = get_or_new(conn, "u1", &rewards, now)?;
            assert_eq!(profile.version, 0);
            profile.award(15, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
            profile.version = save_profile(conn, &profile, now)?;

            let stored = get_profile(conn, "u1")?.unwrap();
            assert_eq!(stored, profile);
            assert_eq!(stored.streak.current, 1);
            assert_eq!(stored.hearts.current, rewards.max_hearts);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_concurrent_update_conflicts() {
        let db = ProgressDb::open_in_memory().unwrap();
        let rewards = RewardConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        db.with_conn(|conn| {
            let mut profile = get_or_new(conn, "u1", &rewards, now)?;
            profile.version = save_profile(conn, &profile, now)?;

            let mut first = profile.clone();
            let mut second = profile;
            first.award(10, today);
            second.award(20, today);

            save_profile(conn, &first, now)?;
            let err = save_profile(conn, &second, now).unwrap_err();
            assert!(matches!(err, ProgressError::Conflict(_)));
            assert_eq!(get_profile(conn, "u1")?.unwrap().total_xp, 10);
            Ok(())
        })
        .unwrap();
    }
}
