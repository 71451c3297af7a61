/// Lifecycle of an instrumented connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    AccessingResponse,
    Finalized,
}

/// Something the host did (or that happened) to an instrumented connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    /// `connect()`
    Connect,
    /// Request body stream requested
    RequestStream,
    /// Status, headers, content length or similar read
    ResponseMetadata,
    /// Response or error body stream requested
    ResponseStream,
    /// A wrapped response stream reached its end
    StreamCompleted,
    /// `disconnect()`, before delegating
    Disconnect,
    /// Last handle to the connection released
    Released,
}

/// What the connection must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    /// Read and cache status, headers and content length
    pub cache_metadata: bool,
    /// Build and report the record
    pub finalize: bool,
}

impl Transition {
    const fn stay(state: ConnectionState) -> Self {
        Self {
            next: state,
            cache_metadata: false,
            finalize: false,
        }
    }
}

impl ConnectionState {
    /// Decide the transition for `event`.
    ///
    /// With wrapped streams, finalizing waits for the response stream to
    /// complete (or for disconnect/release) so the drained body can be
    /// counted and captured. Without them, any response access finalizes.
    #[must_use]
    pub fn on_event(self, event: AccessEvent, streams_wrapped: bool) -> Transition {
        use AccessEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Finalized, _) => Transition::stay(S::Finalized),
            (S::Created, E::Released) => Transition {
                next: S::Finalized,
                cache_metadata: false,
                finalize: false,
            },
            (S::Created | S::Connecting, E::Connect | E::RequestStream) => Transition::stay(S::Connecting),
            (S::AccessingResponse, E::Connect | E::RequestStream) => Transition::stay(S::AccessingResponse),
            (_, E::ResponseMetadata | E::ResponseStream) => Transition {
                next: if streams_wrapped { S::AccessingResponse } else { S::Finalized },
                cache_metadata: event == E::ResponseMetadata || !streams_wrapped,
                finalize: !streams_wrapped,
            },
            (_, E::StreamCompleted) => Transition {
                next: S::Finalized,
                cache_metadata: true,
                finalize: true,
            },
            (_, E::Disconnect | E::Released) => Transition {
                next: S::Finalized,
                cache_metadata: false,
                finalize: true,
            },
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const ALL_EVENTS: [AccessEvent; 7] = [
        AccessEvent::Connect,
        AccessEvent::RequestStream,
        AccessEvent::ResponseMetadata,
        AccessEvent::ResponseStream,
        AccessEvent::StreamCompleted,
        AccessEvent::Disconnect,
        AccessEvent::Released,
    ];

    #[test]
    fn test_finalized_absorbs_every_event() {
        for wrapped in [true, false] {
            for event in ALL_EVENTS {
                let t = ConnectionState::Finalized.on_event(event, wrapped);
                assert_eq!(t.next, ConnectionState::Finalized);
                assert!(!t.finalize && !t.cache_metadata, "{event:?}");
            }
        }
    }

    #[test]
    fn test_wrapped_metadata_access_defers_finalize() {
        let t = ConnectionState::Connecting.on_event(AccessEvent::ResponseMetadata, true);
        assert_eq!(t.next, ConnectionState::AccessingResponse);
        assert!(t.cache_metadata);
        assert!(!t.finalize);

        let t = t.next.on_event(AccessEvent::ResponseStream, true);
        assert!(!t.finalize);
        assert!(!t.cache_metadata);

        let t = t.next.on_event(AccessEvent::StreamCompleted, true);
        assert_eq!(t.next, ConnectionState::Finalized);
        assert!(t.cache_metadata && t.finalize);
    }

    #[test]
    fn test_unwrapped_response_access_finalizes() {
        for event in [AccessEvent::ResponseMetadata, AccessEvent::ResponseStream] {
            let t = ConnectionState::Connecting.on_event(event, false);
            assert_eq!(t.next, ConnectionState::Finalized);
            assert!(t.cache_metadata && t.finalize);
        }
    }

    #[test]
    fn test_disconnect_finalizes_without_touching_response() {
        for state in [ConnectionState::Created, ConnectionState::Connecting, ConnectionState::AccessingResponse] {
            let t = state.on_event(AccessEvent::Disconnect, true);
            assert_eq!(t.next, ConnectionState::Finalized);
            assert!(t.finalize);
            assert!(!t.cache_metadata);
        }
    }

    #[test]
    fn test_release_of_untouched_connection_reports_nothing() {
        let t = ConnectionState::Created.on_event(AccessEvent::Released, true);
        assert!(!t.finalize);
        let t = ConnectionState::Connecting.on_event(AccessEvent::Released, true);
        assert!(t.finalize);
    }

    #[test]
    fn test_request_side_events_do_not_finalize() {
        for state in [ConnectionState::Created, ConnectionState::Connecting] {
            for event in [AccessEvent::Connect, AccessEvent::RequestStream] {
                let t = state.on_event(event, false);
                assert_eq!(t.next, ConnectionState::Connecting);
                assert!(!t.finalize);
            }
        }
    }
}
