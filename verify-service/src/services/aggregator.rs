//! Collects identity, linked accounts and network origin for one callback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

use crate::models::{ClientInfo, VerificationRecord, VerificationRequest};
use crate::services::error::VerificationError;
use crate::services::geo::GeoResolver;
use crate::services::identity::IdentityProvider;

pub struct VerificationAggregator {
    identity: Arc<dyn IdentityProvider>,
    geo: Arc<dyn GeoResolver>,
    redirect_uri: String,
    call_timeout: Duration,
}

impl VerificationAggregator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        geo: Arc<dyn GeoResolver>,
        redirect_uri: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            geo,
            redirect_uri: redirect_uri.into(),
            call_timeout,
        }
    }

    /// Exchange the code, then fetch profile, connections and geo
    /// concurrently and merge them.
    ///
    /// Only the exchange and the profile can fail the aggregate; connections
    /// fall back to an empty list and geo to `None`.
    #[instrument(skip_all)]
    pub async fn aggregate(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationRecord, VerificationError> {
        if request.code.trim().is_empty() {
            return Err(VerificationError::InvalidRequest(
                "empty authorization code".to_string(),
            ));
        }

        let credential = self
            .bounded(
                "exchange",
                self.identity
                    .exchange_code(&request.code, &self.redirect_uri),
            )
            .await?
            .map_err(|e| {
                if e.is_timeout() {
                    self.timed_out("exchange")
                } else {
                    VerificationError::Exchange(e)
                }
            })?;

        let access_token = credential.access_token();
        let (profile, connections, network) = tokio::join!(
            self.bounded("profile", self.identity.fetch_profile(access_token)),
            timeout(
                self.call_timeout,
                self.identity.fetch_connections(access_token)
            ),
            timeout(self.call_timeout, self.geo.resolve(&request.address)),
        );

        let profile = profile?.map_err(|e| {
            if e.is_timeout() {
                self.timed_out("profile")
            } else {
                VerificationError::Profile(e)
            }
        })?;

        let connections = connections.unwrap_or_else(|_| {
            tracing::warn!("Connections fetch timed out, continuing without");
            Vec::new()
        });
        let network = network.unwrap_or_else(|_| {
            tracing::warn!("Geo lookup timed out, network origin unknown");
            None
        });

        Ok(VerificationRecord {
            identity: profile,
            client: ClientInfo {
                address: request.address.clone(),
                user_agent: request.user_agent.clone(),
            },
            network,
            connections,
            credential,
        })
    }

    async fn bounded<T>(
        &self,
        during: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, VerificationError> {
        timeout(self.call_timeout, fut)
            .await
            .map_err(|_| self.timed_out(during))
    }

    fn timed_out(&self, during: &'static str) -> VerificationError {
        VerificationError::Timeout {
            during,
            after: self.call_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connection, GeoRecord};
    use crate::services::identity::IdentityError;
    use crate::services::mock::{sample_profile, MockGeoResolver, MockIdentityProvider};
    use crate::services::Stage;

    fn request() -> VerificationRequest {
        VerificationRequest {
            code: "abc123".to_string(),
            address: "203.0.113.7".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    fn aggregator(
        identity: Arc<MockIdentityProvider>,
        geo: Arc<MockGeoResolver>,
    ) -> VerificationAggregator {
        VerificationAggregator::new(
            identity,
            geo,
            "http://localhost:3000/auth/callback",
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn record_carries_profile_id() {
        let identity = Arc::new(MockIdentityProvider::new(sample_profile("77", "carol")));
        let record = aggregator(identity, Arc::new(MockGeoResolver::unknown()))
            .aggregate(&request())
            .await
            .unwrap();

        assert_eq!(record.identity_id(), "77");
        assert_eq!(record.client.address, "203.0.113.7");
        assert!(record.network.is_none());
        assert!(record.connections.is_empty());
    }

    #[tokio::test]
    async fn exchange_failure_short_circuits() {
        let identity = Arc::new(
            MockIdentityProvider::new(sample_profile("1", "bob")).failing_exchange(
                IdentityError::Status {
                    status: 401,
                    body: "unauthorized".to_string(),
                },
            ),
        );
        let geo = Arc::new(MockGeoResolver::unknown());

        let err = aggregator(identity.clone(), geo.clone())
            .aggregate(&request())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Exchange);
        assert_eq!(identity.profile_calls(), 0);
        assert_eq!(identity.connections_calls(), 0);
        assert_eq!(geo.calls(), 0);
    }

    #[tokio::test]
    async fn profile_failure_is_fatal_even_with_other_data() {
        let identity = Arc::new(
            MockIdentityProvider::new(sample_profile("1", "bob"))
                .with_connections(vec![Connection {
                    platform: "github".to_string(),
                    display_name: "bob".to_string(),
                }])
                .failing_profile(IdentityError::Transport("reset".to_string())),
        );
        let geo = Arc::new(MockGeoResolver::new(GeoRecord {
            address: "203.0.113.7".to_string(),
            country: Some("Norway".to_string()),
            city: None,
            isp: None,
            is_proxy: false,
            is_hosting: false,
            map_link: None,
        }));

        let err = aggregator(identity.clone(), geo.clone())
            .aggregate(&request())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Profile);
        assert_eq!(identity.connections_calls(), 1);
        assert_eq!(geo.calls(), 1);
    }

    #[tokio::test]
    async fn slow_profile_surfaces_as_timeout() {
        let identity = Arc::new(
            MockIdentityProvider::new(sample_profile("1", "bob"))
                .with_profile_delay(Duration::from_secs(5)),
        );

        let err = aggregator(identity, Arc::new(MockGeoResolver::unknown()))
            .aggregate(&request())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Timeout);
    }

    #[tokio::test]
    async fn slow_geo_degrades_to_unknown() {
        let identity = Arc::new(MockIdentityProvider::new(sample_profile("1", "bob")));
        let geo = Arc::new(MockGeoResolver::unknown().with_delay(Duration::from_secs(5)));

        let record = aggregator(identity, geo).aggregate(&request()).await.unwrap();
        assert!(record.network.is_none());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_calls() {
        let identity = Arc::new(MockIdentityProvider::new(sample_profile("1", "bob")));
        let mut req = request();
        req.code = "  ".to_string();

        let err = aggregator(identity.clone(), Arc::new(MockGeoResolver::unknown()))
            .aggregate(&req)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Request);
        assert_eq!(identity.exchange_calls(), 0);
    }
}
