use crate::envelope::{current_time, HealthRes};

/// Outcome of probing one dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub service: &'static str,
    pub healthy: bool,
}

impl Probe {
    pub fn new<T, E>(service: &'static str, result: &Result<T, E>) -> Self {
        Self {
            service,
            healthy: result.is_ok(),
        }
    }
}

/// Health aggregation shared by the health and liveness endpoints.
///
/// Probes are reported in order; the first unhealthy one names the failure.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Fold probe results into a health response.
    ///
    /// # Returns
    /// `Ok` with `ok_message` when every probe is healthy, otherwise `Err` naming the first
    /// unhealthy service.
    pub fn check_health(probes: &[Probe], ok_message: &str) -> Result<HealthRes, HealthRes> {
        let current_time = current_time();
        match probes.iter().find(|p| !p.healthy) {
            Some(failed) => {
                tracing::error!(service = failed.service, "dependency is unhealthy");
                Err(HealthRes {
                    message: format!("{} is unhealthy", failed.service),
                    current_time,
                })
            }
            None => Ok(HealthRes {
                message: ok_message.to_string(),
                current_time,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_healthy() {
        let probes = [
            Probe::new("Identity", &Ok::<(), ()>(())),
            Probe::new("Ledger", &Ok::<_, ()>("pong")),
        ];
        let res = HealthService::check_health(&probes, "Consent gateway health is OK").unwrap();
        assert_eq!(res.message, "Consent gateway health is OK");
    }

    #[test]
    fn test_first_unhealthy_is_named() {
        let probes = [
            Probe::new("Identity", &Ok::<(), ()>(())),
            Probe::new("Ledger", &Err::<(), _>("down")),
            Probe::new("Other", &Err::<(), _>("down")),
        ];
        let res = HealthService::check_health(&probes, "ok").unwrap_err();
        assert_eq!(res.message, "Ledger is unhealthy");
    }
}
