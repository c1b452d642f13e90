pub mod api;
pub mod asset_ref;
pub mod builder;
pub mod codec;
pub mod context;
pub mod deserializer;
pub mod error;
pub mod identity;
pub mod missing;
pub mod object;
pub mod prefab;
pub mod schema;
pub mod uuid;
pub mod walker;
