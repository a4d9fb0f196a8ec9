//! Process exposure settings.
//!
//! An [`Exposure`] declares that a process accepts inbound traffic. The kind
//! of traffic is an open capability: every kind implements [`ExposureType`]
//! and reports the protocol a backend should provision (for example the
//! listener protocol of a load balancer). Backends that need the variant's
//! data can match on it with `downcast_ref`:
//!
//! ```
//! use berth_scheduler::{Exposure, HttpsExposure};
//!
//! let exposure = Exposure::https(true, "acme");
//! if let Some(https) = exposure.kind.downcast_ref::<HttpsExposure>() {
//!     assert_eq!(https.cert, "acme");
//! }
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// A kind of traffic a process exposes.
pub trait ExposureType: Debug + Send + Sync + Any {
    /// Protocol name, e.g. `"http"`.
    fn protocol(&self) -> &'static str;
}

impl dyn ExposureType {
    /// Returns the concrete exposure kind if it is a `T`.
    pub fn downcast_ref<T: ExposureType>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    /// Returns true if the concrete exposure kind is a `T`.
    pub fn is<T: ExposureType>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

/// Plain HTTP traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpExposure;

impl ExposureType for HttpExposure {
    fn protocol(&self) -> &'static str {
        "http"
    }
}

/// HTTPS traffic terminated with a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsExposure {
    /// Opaque certificate reference, resolved by a certificate manager.
    pub cert: String,
}

impl ExposureType for HttpsExposure {
    fn protocol(&self) -> &'static str {
        "https"
    }
}

/// Exposure settings for a process.
#[derive(Debug, Clone)]
pub struct Exposure {
    /// Internet-facing when true, internal-only otherwise. How this is
    /// honoured is backend specific.
    pub external: bool,

    /// Kind of traffic exposed.
    pub kind: Arc<dyn ExposureType>,
}

impl Exposure {
    /// Create an exposure of the given kind.
    pub fn new(external: bool, kind: impl ExposureType) -> Self {
        Self {
            external,
            kind: Arc::new(kind),
        }
    }

    /// HTTP exposure.
    pub fn http(external: bool) -> Self {
        Self::new(external, HttpExposure)
    }

    /// HTTPS exposure using the certificate named `cert`.
    pub fn https(external: bool, cert: impl Into<String>) -> Self {
        Self::new(external, HttpsExposure { cert: cert.into() })
    }

    /// Protocol of the exposed traffic.
    pub fn protocol(&self) -> &'static str {
        self.kind.protocol()
    }
}
