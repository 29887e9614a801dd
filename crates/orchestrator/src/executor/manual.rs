//! Manual fallback: no remote effect, only instructions for the user.

use async_trait::async_trait;
use unsub_core::cancellation::CancellationMethod;

use super::{AttemptContext, CancellationExecutor, ExecutorError, ExecutorSuccess};
use crate::catalog::Subscription;

#[derive(Debug, Default, Clone, Copy)]
pub struct ManualExecutor;

impl ManualExecutor {
    pub fn instructions(subscription: &Subscription) -> String {
        let mut steps = vec![format!(
            "Cancel {} yourself to finish this request.",
            subscription.display_name
        )];
        match &subscription.cancel_url {
            Some(url) => steps.push(format!("1. Sign in and open {url}.")),
            None => steps.push(format!(
                "1. Sign in to your {} account settings.",
                subscription.provider
            )),
        }
        steps.push("2. Choose the option to cancel or turn off auto-renewal.".to_string());
        steps.push("3. Keep the confirmation email or number.".to_string());
        if let Some(contact) = &subscription.support_contact {
            steps.push(format!("If the option is missing, contact {contact}."));
        }
        steps.join("\n")
    }
}

#[async_trait]
impl CancellationExecutor for ManualExecutor {
    fn method(&self) -> CancellationMethod {
        CancellationMethod::Manual
    }

    async fn execute(
        &self,
        subscription: &Subscription,
        _ctx: &AttemptContext,
    ) -> Result<ExecutorSuccess, ExecutorError> {
        Ok(ExecutorSuccess::ActionRequired {
            instructions: Self::instructions(subscription),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_instructions_with_url_and_contact() {
        let subscription = Subscription {
            id: "sub-9".to_string(),
            provider: "paper".to_string(),
            display_name: "Daily Paper".to_string(),
            external_ref: "dp-9".to_string(),
            methods: vec![CancellationMethod::Manual],
            cancel_url: Some("https://paper.test/account".to_string()),
            support_contact: Some("help@paper.test".to_string()),
        };
        let ctx = AttemptContext {
            request_id: 3,
            user_id: 1,
            attempt: 1,
        };

        let ExecutorSuccess::ActionRequired { instructions } =
            ManualExecutor.execute(&subscription, &ctx).await.unwrap()
        else {
            panic!("expected action required");
        };

        assert!(instructions.starts_with("Cancel Daily Paper yourself"));
        assert!(instructions.contains("https://paper.test/account"));
        assert!(instructions.contains("help@paper.test"));
    }
}
