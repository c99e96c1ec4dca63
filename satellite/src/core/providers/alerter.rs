use dashmap::DashMap;
use orbit_common::crypto::PublicKey;
use strum::Display;

// Identifier of an alert, registering twice under the same id replaces
// the previous alert
#[derive(Eq, PartialEq, Hash, Clone, Debug)]
pub enum AlertId {
    // The allowance of a renter can no longer cover contract formation
    // or renewal
    RenterLowFunds(PublicKey),
}

#[derive(Eq, PartialEq, Clone, Copy, Debug, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug)]
pub struct Alert {
    pub id: AlertId,
    pub message: String,
    pub severity: AlertSeverity,
}

// Channel for persistent, user-visible conditions. Alerts stay
// registered until explicitly cleared.
pub trait Alerter: Send + Sync {
    fn register_alert(&self, alert: Alert);

    fn unregister_alert(&self, id: &AlertId);
}

// Registry-backed alerter, also used as the test double
#[derive(Default)]
pub struct MemoryAlerter {
    alerts: DashMap<AlertId, Alert>,
}

impl MemoryAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, id: &AlertId) -> bool {
        self.alerts.contains_key(id)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Alerter for MemoryAlerter {
    fn register_alert(&self, alert: Alert) {
        self.alerts.insert(alert.id.clone(), alert);
    }

    fn unregister_alert(&self, id: &AlertId) {
        self.alerts.remove(id);
    }
}
