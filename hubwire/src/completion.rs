//! Translation of terminal handler outcomes into caller-facing results.

use hubwire_core::{conditions, ErrorCondition};

use crate::error::{DispatchError, DispatchResult, TransportCause};
use crate::handler::{DispatchOutcome, FailureSignal};

/// Map a terminal outcome to the dispatch result.
///
/// A still-pending outcome means the engine stopped without settling, which
/// is reported as an engine failure.
pub fn complete(outcome: &DispatchOutcome) -> DispatchResult<()> {
    match outcome {
        DispatchOutcome::Settled(_) => Ok(()),
        DispatchOutcome::Rejected(reason) => Err(DispatchError::ServiceRejected(reason.clone())),
        DispatchOutcome::TransportFailed(signal) => {
            Err(DispatchError::TransportError(translate_failure(signal)))
        }
        DispatchOutcome::Pending => Err(DispatchError::TransportError(translate_failure(
            &FailureSignal::EngineStopped,
        ))),
    }
}

/// Map a failure signal to its transport cause.
pub fn translate_failure(signal: &FailureSignal) -> TransportCause {
    match signal {
        FailureSignal::TransportError(condition) => {
            classify(condition).unwrap_or_else(|| TransportCause::ConnectionLost(condition.to_string()))
        }
        FailureSignal::ConnectionClosed(error) | FailureSignal::SessionClosed(error) => error
            .as_ref()
            .and_then(classify)
            .unwrap_or_else(|| TransportCause::ConnectionLost(describe(error))),
        FailureSignal::LinkDetached(error) => error
            .as_ref()
            .and_then(classify)
            .unwrap_or_else(|| TransportCause::LinkDetached(describe(error))),
        FailureSignal::DeadlineExceeded => TransportCause::Timeout,
        FailureSignal::EngineFailed(error) => TransportCause::Engine(error.to_string()),
        FailureSignal::EngineStopped => {
            TransportCause::Engine("engine loop exited before the delivery was settled".to_string())
        }
    }
}

/// Conditions that mean the same thing wherever they show up.
fn classify(condition: &ErrorCondition) -> Option<TransportCause> {
    if condition.is(conditions::UNAUTHORIZED_ACCESS) {
        return Some(TransportCause::AuthenticationFailed(
            condition.reason().to_string(),
        ));
    }
    if condition.is(conditions::TIMEOUT) {
        return Some(TransportCause::Timeout);
    }
    let refused = condition
        .description
        .as_deref()
        .is_some_and(|description| description.to_ascii_lowercase().contains("refused"));
    if condition.is(conditions::IO) && refused {
        return Some(TransportCause::ConnectionRefused(condition.reason().to_string()));
    }
    None
}

fn describe(error: &Option<ErrorCondition>) -> String {
    error
        .as_ref()
        .map_or_else(|| "closed by peer".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubwire_core::{DeliveryState, EngineError};

    #[test]
    fn terminal_outcomes_map_to_taxonomy() {
        assert_eq!(
            complete(&DispatchOutcome::Settled(DeliveryState::Accepted)),
            Ok(())
        );
        assert_eq!(
            complete(&DispatchOutcome::Rejected("IotHubNotFound".to_string())),
            Err(DispatchError::ServiceRejected("IotHubNotFound".to_string()))
        );
        assert_eq!(
            complete(&DispatchOutcome::TransportFailed(FailureSignal::DeadlineExceeded)),
            Err(DispatchError::TransportError(TransportCause::Timeout))
        );
    }

    #[test]
    fn pending_outcome_is_an_engine_failure() {
        let err = complete(&DispatchOutcome::Pending).expect_err("pending must fail");
        assert!(matches!(
            err,
            DispatchError::TransportError(TransportCause::Engine(_))
        ));
    }

    #[test]
    fn refused_socket_is_connection_refused() {
        let signal = FailureSignal::TransportError(
            ErrorCondition::new(conditions::IO).with_description("Connection refused"),
        );
        assert_eq!(
            translate_failure(&signal),
            TransportCause::ConnectionRefused("Connection refused".to_string())
        );
    }

    #[test]
    fn other_io_errors_are_connection_lost() {
        let signal = FailureSignal::TransportError(
            ErrorCondition::new(conditions::IO).with_description("Connection reset by peer"),
        );
        assert_eq!(
            translate_failure(&signal),
            TransportCause::ConnectionLost("proton:io: Connection reset by peer".to_string())
        );
    }

    #[test]
    fn unauthorized_anywhere_is_authentication_failure() {
        let condition =
            ErrorCondition::new(conditions::UNAUTHORIZED_ACCESS).with_description("SAS token expired");
        for signal in [
            FailureSignal::TransportError(condition.clone()),
            FailureSignal::ConnectionClosed(Some(condition.clone())),
            FailureSignal::LinkDetached(Some(condition.clone())),
        ] {
            assert_eq!(
                translate_failure(&signal),
                TransportCause::AuthenticationFailed("SAS token expired".to_string())
            );
        }
    }

    #[test]
    fn link_detach_keeps_condition() {
        let signal =
            FailureSignal::LinkDetached(Some(ErrorCondition::new(conditions::LINK_DETACH_FORCED)));
        assert_eq!(
            translate_failure(&signal),
            TransportCause::LinkDetached("amqp:link:detach-forced".to_string())
        );
        assert_eq!(
            translate_failure(&FailureSignal::SessionClosed(None)),
            TransportCause::ConnectionLost("closed by peer".to_string())
        );
    }

    #[test]
    fn service_timeout_condition_is_timeout() {
        let signal =
            FailureSignal::ConnectionClosed(Some(ErrorCondition::new(conditions::TIMEOUT)));
        assert_eq!(translate_failure(&signal), TransportCause::Timeout);
    }

    #[test]
    fn engine_errors_are_carried() {
        let signal = FailureSignal::EngineFailed(EngineError::Start("no tls".to_string()));
        assert_eq!(
            translate_failure(&signal),
            TransportCause::Engine("engine failed to start: no tls".to_string())
        );
    }
}
