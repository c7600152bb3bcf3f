//! Federated identity handling.
//!
//! - [`mapping`] - protocol vocabularies and required-field validation
//! - [`identity`] - the canonical identity passed to provisioning
//! - [`provisioning`] - the per-visit account provisioning state machine

pub mod identity;
pub mod mapping;
pub mod provisioning;

pub use identity::{CanonicalIdentity, FULLNAME, ID, MAIL, REQUIRED_ATTRIBUTES};
pub use mapping::{
    AttributeMapper, AttributeProtocol, RapidConnectAttributeMap, RawAttributes,
    ShibbolethAttributeMap, flatten_claims, parse_and_validate, validate_required,
};
pub use provisioning::{AccountStatus, ProvisioningStateMachine, VisitOutcome};
