use tracing::info;

/// Numeric precision of the forward/backward calls. Resolved once at
/// startup; the training control flow is identical for both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Full,
    /// Activations and gradients are rounded through `f32`.
    Mixed,
}

impl Precision {
    /// Mixed precision needs both the request and an accelerator device.
    pub fn resolve(requested: bool, device: &str) -> Precision {
        let on_accelerator = !device.trim().eq_ignore_ascii_case("cpu");
        let precision = if requested && on_accelerator {
            Precision::Mixed
        } else {
            Precision::Full
        };
        info!("Using {} precision on device {device}", precision.label());
        precision
    }

    pub fn label(self) -> &'static str {
        match self {
            Precision::Full => "full",
            Precision::Mixed => "mixed",
        }
    }

    #[inline]
    pub fn quantize(self, x: f64) -> f64 {
        match self {
            Precision::Full => x,
            Precision::Mixed => x as f32 as f64,
        }
    }
}
