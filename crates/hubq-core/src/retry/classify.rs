//! Classify hub tool failures, HTTP statuses and IO errors as transient or permanent.

use std::io;

use crate::transfer::TransferError;

/// Output fragments that mean retrying cannot help.
const PERMANENT_MARKERS: &[&str] = &[
    "RepositoryNotFoundError",
    "Repository Not Found",
    "RevisionNotFoundError",
    "EntryNotFoundError",
    "GatedRepoError",
    "Invalid username or password",
    "No space left on device",
    "Disk quota exceeded",
    "Permission denied",
];

/// Classify an HTTP status code reported by the hub.
pub fn classify_http_status(code: u16) -> TransferError {
    match code {
        408 | 425 | 429 => TransferError::Transient(format!("HTTP {code}")),
        400..=499 => TransferError::Permanent(format!("HTTP {code}")),
        _ => TransferError::Transient(format!("HTTP {code}")),
    }
}

/// Find the first `NNN Client Error` / `NNN Server Error` in tool output.
fn http_status_in(output: &str) -> Option<u16> {
    for marker in [" Client Error", " Server Error"] {
        if let Some(pos) = output.find(marker) {
            let head = &output[..pos];
            let digits: String = head
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if let Ok(code) = digits.parse::<u16>() {
                return Some(code);
            }
        }
    }
    None
}

/// Last non-empty line of the tool output, used as the error message.
fn summary(output: &str) -> Option<&str> {
    output.lines().map(str::trim).rfind(|l| !l.is_empty())
}

/// Classify a failed hub CLI run from its exit code and captured output.
pub fn classify_tool_failure(exit_code: Option<i32>, output: &str) -> TransferError {
    let message = match (summary(output), exit_code) {
        (Some(line), _) => line.to_string(),
        (None, Some(code)) => format!("hub tool exited with status {code}"),
        (None, None) => "hub tool terminated by signal".to_string(),
    };

    // 126/127: the shell could not run the tool at all.
    if matches!(exit_code, Some(126) | Some(127)) {
        return TransferError::Permanent(message);
    }
    if PERMANENT_MARKERS.iter().any(|m| output.contains(m)) {
        return TransferError::Permanent(message);
    }
    match http_status_in(output).map(classify_http_status) {
        Some(TransferError::Permanent(_)) => TransferError::Permanent(message),
        _ => TransferError::Transient(message),
    }
}

/// Classify a local IO failure (spawning the tool, reading partial files).
pub fn classify_io_error(e: &io::Error) -> TransferError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            TransferError::Permanent(e.to_string())
        }
        // ENOSPC / EDQUOT
        _ if matches!(e.raw_os_error(), Some(28) | Some(122)) => {
            TransferError::Permanent(e.to_string())
        }
        _ => TransferError::Transient(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permanent(e: &TransferError) -> bool {
        matches!(e, TransferError::Permanent(_))
    }

    #[test]
    fn http_429_and_5xx_transient() {
        assert!(!is_permanent(&classify_http_status(429)));
        assert!(!is_permanent(&classify_http_status(503)));
        assert!(!is_permanent(&classify_http_status(500)));
    }

    #[test]
    fn http_4xx_permanent() {
        assert!(is_permanent(&classify_http_status(404)));
        assert!(is_permanent(&classify_http_status(401)));
    }

    #[test]
    fn missing_repository_is_permanent() {
        let out = "Traceback...\nhuggingface_hub.errors.RepositoryNotFoundError: 401 Client Error.\nRepository Not Found for url: https://huggingface.co/api/models/nope/nope";
        let e = classify_tool_failure(Some(1), out);
        assert!(is_permanent(&e));
        assert_eq!(
            e,
            TransferError::Permanent(
                "Repository Not Found for url: https://huggingface.co/api/models/nope/nope".into()
            )
        );
    }

    #[test]
    fn http_status_in_output_decides() {
        let e = classify_tool_failure(Some(1), "requests.exceptions.HTTPError: 403 Client Error: Forbidden");
        assert!(is_permanent(&e));
        let e = classify_tool_failure(Some(1), "HTTPError: 502 Server Error: Bad Gateway");
        assert!(!is_permanent(&e));
    }

    #[test]
    fn network_noise_is_transient() {
        let e = classify_tool_failure(Some(1), "ConnectionResetError: [Errno 104] Connection reset by peer\n");
        assert!(!is_permanent(&e));
        let e = classify_tool_failure(None, "");
        assert_eq!(e, TransferError::Transient("hub tool terminated by signal".into()));
    }

    #[test]
    fn disk_full_is_permanent() {
        let e = classify_tool_failure(Some(1), "OSError: [Errno 28] No space left on device");
        assert!(is_permanent(&e));
        let io = io::Error::from_raw_os_error(28);
        assert!(is_permanent(&classify_io_error(&io)));
    }

    #[test]
    fn missing_tool_is_permanent() {
        let io = io::Error::new(io::ErrorKind::NotFound, "huggingface-cli");
        assert!(is_permanent(&classify_io_error(&io)));
        assert!(is_permanent(&classify_tool_failure(Some(127), "")));
        let io = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert!(!is_permanent(&classify_io_error(&io)));
    }
}
