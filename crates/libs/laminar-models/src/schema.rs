// The builds table, matching the migration. SQL column names keep the
// camelCase the original database used; Rust-side names are snake_case.

diesel::table! {
    builds (name, number) {
        name -> Text,
        number -> Integer,
        node -> Text,
        #[sql_name = "queuedAt"]
        queued_at -> BigInt,
        #[sql_name = "startedAt"]
        started_at -> BigInt,
        #[sql_name = "completedAt"]
        completed_at -> BigInt,
        result -> Integer,
        output -> Binary,
        #[sql_name = "outputLen"]
        output_len -> BigInt,
        #[sql_name = "parentJob"]
        parent_job -> Text,
        #[sql_name = "parentBuild"]
        parent_build -> Integer,
        reason -> Text,
    }
}
