//! RowInserter implementations

mod postgres;

#[cfg(feature = "postgres")]
pub use self::postgres::PgRowInserter;
pub use self::postgres::build_insert_query;
