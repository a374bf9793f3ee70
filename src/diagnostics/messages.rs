//! Human-readable status lines for markers.
use super::{DiagnosticsAction, DiagnosticsKey, DiagnosticsStep};

use super::DiagnosticsAction::{End, Start};
use super::DiagnosticsKey::{DataStoreConfigSpecs, DownloadConfigSpecs, Overall};
use super::DiagnosticsStep::{Fetch, NetworkRequest, Process};

struct StatusMessage {
    success: &'static str,
    failure: &'static str,
}

const fn always(message: &'static str) -> StatusMessage {
    StatusMessage {
        success: message,
        failure: message,
    }
}

const fn outcome(success: &'static str, failure: &'static str) -> StatusMessage {
    StatusMessage { success, failure }
}

type MessageKey = (DiagnosticsKey, Option<DiagnosticsStep>, DiagnosticsAction);

const STATUS_MESSAGES: &[(MessageKey, StatusMessage)] = &[
    ((Overall, None, Start), always("Starting...")),
    ((Overall, None, End), always("Done")),
    (
        (DownloadConfigSpecs, Some(NetworkRequest), Start),
        always("Loading specs from network..."),
    ),
    (
        (DownloadConfigSpecs, Some(NetworkRequest), End),
        outcome(
            "Done loading specs from network",
            "Failed to load specs from network",
        ),
    ),
    (
        (DownloadConfigSpecs, Some(Process), Start),
        always("Processing specs from network..."),
    ),
    (
        (DownloadConfigSpecs, Some(Process), End),
        outcome(
            "Done processing specs from network",
            "No updates to specs from network",
        ),
    ),
    (
        (DataStoreConfigSpecs, Some(Fetch), Start),
        always("Loading specs from adapter..."),
    ),
    (
        (DataStoreConfigSpecs, Some(Fetch), End),
        outcome(
            "Done loading specs from adapter",
            "Failed to load specs from adapter",
        ),
    ),
    (
        (DataStoreConfigSpecs, Some(Process), Start),
        always("Processing specs from adapter..."),
    ),
    (
        (DataStoreConfigSpecs, Some(Process), End),
        outcome(
            "Done processing specs from adapter",
            "No updates to specs from adapter",
        ),
    ),
];

/// Look up the status line for a marker. A missing `success` tag selects the failure variant.
pub(crate) fn status_message(
    key: DiagnosticsKey,
    step: Option<DiagnosticsStep>,
    action: DiagnosticsAction,
    success: Option<bool>,
) -> Option<&'static str> {
    // The overall key has no steps; any step recorded with it is ignored.
    let step = if key == Overall { None } else { step };

    STATUS_MESSAGES
        .iter()
        .find(|(entry, _)| *entry == (key, step, action))
        .map(|(_, message)| {
            if success.unwrap_or(false) {
                message.success
            } else {
                message.failure
            }
        })
}
