use sqlx::Postgres;
use sqlx::query_builder::Separated;

/// A row that can be bulk-upserted with `QueryBuilder::push_values`.
pub trait UpsertRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Conflict column for ON CONFLICT ... DO UPDATE.
    const KEY: &'static str;

    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>);
}
