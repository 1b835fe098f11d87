//! Caller-side validation of subjects and queue group names.

use crate::error::ClientError;

/// Check that `subject` is usable on the wire.
///
/// Subjects must be non-empty, contain no whitespace and have no empty
/// tokens (`foo..bar`, `.foo`, `foo.`).
///
/// # Errors
///
/// Returns [`ClientError::InvalidSubject`] when the subject is rejected.
///
/// # Examples
///
/// ```
/// use natwire::proto::validate_subject;
///
/// assert!(validate_subject("orders.created").is_ok());
/// assert!(validate_subject("").is_err());
/// assert!(validate_subject("two words").is_err());
/// ```
pub fn validate_subject(subject: &str) -> Result<(), ClientError> {
    if subject.is_empty()
        || subject.bytes().any(|b| b.is_ascii_whitespace())
        || subject.split('.').any(str::is_empty)
    {
        return Err(ClientError::InvalidSubject(subject.to_owned()));
    }
    Ok(())
}

/// Check that `queue_group` is a single non-empty token.
///
/// # Errors
///
/// Returns [`ClientError::InvalidQueueGroup`] when the name is rejected.
pub fn validate_queue_group(queue_group: &str) -> Result<(), ClientError> {
    if queue_group.is_empty() || queue_group.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(ClientError::InvalidQueueGroup(queue_group.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("foo")]
    #[case("foo.bar")]
    #[case("foo.*")]
    #[case("foo.>")]
    #[case("_INBOX.abc.def")]
    fn accepts_well_formed_subjects(#[case] subject: &str) {
        assert!(validate_subject(subject).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("foo bar")]
    #[case("foo\tbar")]
    #[case("foo..bar")]
    #[case(".foo")]
    #[case("foo.")]
    #[case("foo\r\n")]
    fn rejects_malformed_subjects(#[case] subject: &str) {
        assert!(matches!(
            validate_subject(subject),
            Err(ClientError::InvalidSubject(_))
        ));
    }

    #[test]
    fn queue_groups_must_be_single_tokens() {
        assert!(validate_queue_group("workers").is_ok());
        assert!(validate_queue_group("").is_err());
        assert!(validate_queue_group("two words").is_err());
    }
}
