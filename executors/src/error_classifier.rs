use relay_core::error::RelayError;

/// Send failures the relay reacts to specifically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Nonce already mined
    NonceTooLow,
    /// A transaction with this nonce sits in the mempool at a higher price
    ReplacementUnderpriced,
    /// The exact transaction is already in the mempool
    AlreadyKnown,
    Other,
}

impl SendErrorKind {
    /// The nonce is taken by something else, which is what a burn wants.
    pub fn nonce_consumed(&self) -> bool {
        matches!(
            self,
            SendErrorKind::NonceTooLow
                | SendErrorKind::ReplacementUnderpriced
                | SendErrorKind::AlreadyKnown
        )
    }
}

pub struct SendErrorClassifier;

impl SendErrorClassifier {
    pub fn classify(error: &RelayError) -> SendErrorKind {
        let message = match error {
            RelayError::Blockchain { message, .. }
            | RelayError::Relayer { message, .. }
            | RelayError::Network { message } => message,
            _ => return SendErrorKind::Other,
        };
        Self::classify_message(message)
    }

    fn classify_message(message: &str) -> SendErrorKind {
        let msg_lower = message.to_lowercase();

        if msg_lower.contains("nonce too low") {
            SendErrorKind::NonceTooLow
        } else if msg_lower.contains("underpriced") {
            SendErrorKind::ReplacementUnderpriced
        } else if msg_lower.contains("already known") {
            SendErrorKind::AlreadyKnown
        } else {
            SendErrorKind::Other
        }
    }
}
