// Diesel table definitions, kept in sync with the DDL in `schema.rs`.

diesel::table! {
    worlds (id) {
        id -> Text,
        title -> Text,
        order_index -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    chapters (id) {
        id -> Text,
        world_id -> Text,
        title -> Text,
        order_index -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    lessons (id) {
        id -> Text,
        chapter_id -> Text,
        title -> Text,
        order_index -> Integer,
        xp_reward -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    lesson_attempts (user_id, lesson_id) {
        user_id -> Text,
        lesson_id -> Text,
        status -> Text,
        best_score -> Integer,
        mastery_level -> Integer,
        started_at -> Text,
        completed_at -> Nullable<Text>,
        updated_at -> Text,
        version -> BigInt,
    }
}

diesel::table! {
    gamification_profiles (user_id) {
        user_id -> Text,
        total_xp -> BigInt,
        hearts -> Integer,
        hearts_updated_at -> Text,
        streak_current -> Integer,
        streak_longest -> Integer,
        streak_last_active -> Nullable<Text>,
        daily_goal_xp -> Integer,
        daily_xp_today -> Integer,
        daily_goal_date -> Nullable<Text>,
        utc_offset_minutes -> Integer,
        created_at -> Text,
        updated_at -> Text,
        version -> BigInt,
    }
}

diesel::table! {
    card_definitions (id) {
        id -> Text,
        title -> Text,
        description -> Text,
        unlock_condition_json -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    user_card_unlocks (user_id, card_id) {
        user_id -> Text,
        card_id -> Text,
        unlocked_at -> Text,
        source_lesson_id -> Nullable<Text>,
    }
}

diesel::table! {
    completion_receipts (user_id, idempotency_key) {
        user_id -> Text,
        idempotency_key -> Text,
        lesson_id -> Text,
        attempt_mode -> Text,
        summary_json -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    card_evaluation_jobs (id) {
        id -> Text,
        user_id -> Text,
        lesson_id -> Text,
        score -> Integer,
        total_xp -> BigInt,
        streak_current -> Integer,
        completed_count -> BigInt,
        attempts -> Integer,
        last_error -> Nullable<Text>,
        next_attempt_at -> Text,
        created_at -> Text,
        idempotency_key -> Nullable<Text>,
    }
}

diesel::joinable!(chapters -> worlds (world_id));
diesel::joinable!(lessons -> chapters (chapter_id));

diesel::allow_tables_to_appear_in_same_query!(
    worlds,
    chapters,
    lessons,
    lesson_attempts,
    gamification_profiles,
    card_definitions,
    user_card_unlocks,
    completion_receipts,
    card_evaluation_jobs,
);
