//! Document model for Armada manifests.
//!
//! This crate defines the schema layer: the three routed document kinds
//! (`armada/Manifest/v1`, `armada/ChartGroup/v1`, `armada/Chart/v1`), parsing of
//! multi-document YAML streams with manifest selection (`DocumentSet::parse`),
//! referential-integrity validation, and the string newtypes used as lookup keys
//! and cluster-facing names. No cluster access happens here.

pub mod document;
pub mod store;
pub mod types;

pub use document::{
    Chart, ChartGroup, ChartGroupData, ChartSpec, ChartWait, Document, DocumentHeader,
    DocumentKind, Manifest, ManifestData, Metadata, CHART_GROUP_SCHEMA, CHART_SCHEMA,
    MANIFEST_SCHEMA,
};
pub use store::{split_documents, DocumentError, DocumentSet};
pub use types::{DocumentName, ResourceName};
