// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

diesel::table! {
    runs (id) {
        id -> BigInt,
        date -> Text,
        session_code -> Text,
        is_active -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    attendances (id) {
        id -> BigInt,
        run_id -> BigInt,
        runner_id -> Text,
        registered_at -> Text,
    }
}

diesel::table! {
    calendar_config (date) {
        date -> Text,
        has_run -> Integer,
        updated_at -> Text,
    }
}

diesel::joinable!(attendances -> runs (run_id));

diesel::allow_tables_to_appear_in_same_query!(runs, attendances, calendar_config);
