//! HTTP API.
pub mod metrics;
pub mod status;
pub mod users;

use axum::extract::FromRequest;

use crate::ServerError;

/// JSON body whose rejection is reported like every other error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServerError))]
pub struct Json<T>(pub T);

#[cfg(test)]
pub(crate) fn state(
    directory: std::sync::Arc<crate::directory::memory::MemoryDirectory>,
    delete_behavior: crate::provisioning::DeleteBehavior,
) -> crate::AppState {
    use crate::provisioning::schema::Schema;
    use crate::provisioning::{Provisioner, ProvisionerConfig};

    let provisioner = Provisioner::new(
        directory,
        ProvisionerConfig {
            base_dn: "ou=people,dc=example,dc=org".to_owned(),
            delete_behavior,
            schema: Schema::new("cn", "accountActive", &["sn".to_owned()]),
        },
    );

    crate::AppState {
        config: std::sync::Arc::new(crate::config::Configuration::default()),
        provisioner: std::sync::Arc::new(provisioner),
        metrics: None,
    }
}
