//! GraphQL surface: type resolution, schema building, execution and
//! mounting.
//!
//! - [`types`]: Runtime types and the identity-preserving resolver
//! - [`builder`]: `Query`/`Mutation` synthesis from resolver metadata
//! - [`schema`]: The built schema and its SDL printer
//! - [`parser`]: Executable document parser
//! - [`executor`]: Request execution with null propagation
//! - [`mount`]: HTTP endpoint installation

pub mod builder;
pub mod executor;
pub mod mount;
pub mod parser;
pub mod schema;
pub mod types;

pub use builder::SchemaBuilder;
pub use executor::{execute, GraphQLError, GraphQLRequest, GraphQLResponse};
pub use mount::mount_graphql;
pub use schema::{RootField, RootType, Schema, PLACEHOLDER_FIELD};
pub use types::{GraphQLType, ObjectType, Scalar, TypeResolver};
