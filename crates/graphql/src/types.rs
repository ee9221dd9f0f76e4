//! GraphQL type definitions.

use async_graphql::{EmptyMutation, EmptySubscription, Schema};

use crate::schema::RecordsQuery;

/// The schema serving the `records` connection.
pub type FolioSchema = Schema<RecordsQuery, EmptyMutation, EmptySubscription>;
