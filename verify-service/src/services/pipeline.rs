use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

use crate::models::{ProvisionReport, VerificationRecord, VerificationRequest};
use crate::services::aggregator::VerificationAggregator;
use crate::services::error::VerificationError;
use crate::services::metrics::record_verification;
use crate::services::provisioner::GrantProvisioner;
use crate::services::webhook::NotificationSink;

/// Result of a callback that made it through every fatal stage.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub identity_id: String,
    pub report: ProvisionReport,
}

/// Aggregate, notify, then provision.
///
/// Notification strictly precedes provisioning. The verification deadline
/// bounds the stages that can fail the request; provisioning is bounded
/// per call instead and never fails it.
pub struct VerificationPipeline {
    aggregator: VerificationAggregator,
    sink: Arc<dyn NotificationSink>,
    provisioner: GrantProvisioner,
    deadline: Duration,
    call_timeout: Duration,
}

impl VerificationPipeline {
    pub fn new(
        aggregator: VerificationAggregator,
        sink: Arc<dyn NotificationSink>,
        provisioner: GrantProvisioner,
        deadline: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            sink,
            provisioner,
            deadline,
            call_timeout,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerificationError> {
        let result = match timeout(self.deadline, self.collect_and_notify(&request)).await {
            Ok(result) => result,
            Err(_) => Err(VerificationError::Timeout {
                during: "verification",
                after: self.deadline,
            }),
        };

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                record_verification("failure", e.stage().as_str());
                return Err(e);
            }
        };

        let report = self.provisioner.provision(record.identity_id()).await;
        record_verification("success", "none");

        Ok(VerificationOutcome {
            identity_id: record.identity.id,
            report,
        })
    }

    async fn collect_and_notify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationRecord, VerificationError> {
        let record = self.aggregator.aggregate(request).await?;

        match timeout(self.call_timeout, self.sink.deliver(&record)).await {
            Ok(Ok(())) => Ok(record),
            Ok(Err(e)) if e.is_timeout() => Err(VerificationError::Timeout {
                during: "delivery",
                after: self.call_timeout,
            }),
            Ok(Err(e)) => Err(VerificationError::Delivery(e)),
            Err(_) => Err(VerificationError::Timeout {
                during: "delivery",
                after: self.call_timeout,
            }),
        }
    }
}
