use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Immutable device identity `(product_id, thing_id)`.
///
/// Only used for identity and logging; never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePath {
    product_id: String,
    thing_id: String,
}

impl DevicePath {
    pub fn new(product_id: impl Into<String>, thing_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            thing_id: thing_id.into(),
        }
    }

    #[inline]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    #[inline]
    pub fn thing_id(&self) -> &str {
        &self.thing_id
    }

    /// URN form, e.g. `urn:thing:p1:d1`.
    pub fn urn(&self) -> String {
        format!("urn:thing:{}:{}", self.product_id, self.thing_id)
    }

    /// Canonical URI form, e.g. `/p1/d1`.
    pub fn uri(&self) -> String {
        format!("/{}/{}", self.product_id, self.thing_id)
    }

    /// System topic under this device, e.g. `/sys/p1/d1/thing/config/get`.
    pub fn sys_topic(&self, suffix: &str) -> String {
        format!(
            "/sys/{}/{}/{}",
            self.product_id,
            self.thing_id,
            suffix.trim_start_matches('/')
        )
    }
}

impl Display for DevicePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}
