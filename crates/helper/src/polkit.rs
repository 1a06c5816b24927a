//! Polkit authorization for event simulation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zbus::zvariant::{Type, Value};
use zbus::Connection;

use battbench_replay::bus::SIMULATE_EVENTS_ACTION;

/// Allow polkit to interactively authenticate the user.
const ALLOW_USER_INTERACTION: u32 = 1;

/// Subject of an authorization check, here always a system-bus name.
#[derive(Debug, Serialize, Type)]
pub struct Subject<'a> {
    pub kind: &'a str,
    pub details: HashMap<&'a str, Value<'a>>,
}

#[derive(Debug, Deserialize, Type)]
pub struct AuthorizationResult {
    pub is_authorized: bool,
    pub is_challenge: bool,
    pub details: HashMap<String, String>,
}

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait Authority {
    fn check_authorization(
        &self,
        subject: &Subject<'_>,
        action_id: &str,
        details: HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<AuthorizationResult>;
}

/// Ask polkit whether `sender` may simulate input events.
///
/// `Ok(())` means authorized. A denial, a challenge the agent did not
/// complete, or an unreachable polkit all surface as `AccessDenied`, which
/// the factory forwards to the caller.
pub async fn check_simulate_events(sender: &str, connection: &Connection) -> zbus::fdo::Result<()> {
    let authority = AuthorityProxy::new(connection)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("Can't reach polkit: {e}")))?;

    let mut details = HashMap::new();
    details.insert("name", Value::from(sender));
    let subject = Subject {
        kind: "system-bus-name",
        details,
    };

    let result = authority
        .check_authorization(
            &subject,
            SIMULATE_EVENTS_ACTION,
            HashMap::new(),
            ALLOW_USER_INTERACTION,
            "",
        )
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("Authorization check failed: {e}")))?;

    if result.is_authorized {
        Ok(())
    } else {
        tracing::info!(sender, challenge = result.is_challenge, "Authorization denied");
        Err(zbus::fdo::Error::AccessDenied(
            "Not authorized to simulate input events".to_string(),
        ))
    }
}
