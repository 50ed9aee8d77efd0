//! Observable tile request.
//!
//! A request is a small state machine owned by the data source that
//! started it. The source pushes data and errors in; any number of
//! observers watch snapshots of the state. A request may carry
//! intermediate data (a stale cached tile emitted while the network is
//! consulted) before its final result.

use bytes::Bytes;
use tokio::sync::watch;

use super::DataSourceError;
use crate::coord::TileCoord;

/// Snapshot of a request's progress.
///
/// At most one of `data` and `error` is set once `completed` is true;
/// before completion `data` may hold an intermediate (stale) tile.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    /// Most recently emitted tile bytes, if any.
    pub data: Option<Bytes>,
    /// Terminal error, if the request failed.
    pub error: Option<DataSourceError>,
    /// True once no further emissions will happen.
    pub completed: bool,
}

/// An in-flight tile request.
///
/// Emission methods (`emit_data`, `emit_error`, `complete`) are for the
/// data source driving the request; their sequencing rules are contract
/// violations when broken, and they panic rather than silently corrupt
/// observer state. Observers use [`updates`](Self::updates) or
/// [`wait`](Self::wait).
pub struct TileRequest {
    coord: TileCoord,
    tx: watch::Sender<RequestState>,
}

impl TileRequest {
    /// Create a request for a tile coordinate, in the initial state.
    pub fn new(coord: TileCoord) -> Self {
        let (tx, _rx) = watch::channel(RequestState::default());
        Self { coord, tx }
    }

    /// The coordinate this request is for.
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Tile column.
    pub fn x(&self) -> u32 {
        self.coord.x
    }

    /// Tile row.
    pub fn y(&self) -> u32 {
        self.coord.y
    }

    /// Tile zoom level.
    pub fn zoom(&self) -> u8 {
        self.coord.zoom
    }

    /// Most recently emitted data, if any.
    pub fn data(&self) -> Option<Bytes> {
        self.tx.borrow().data.clone()
    }

    /// Terminal error, if the request failed.
    pub fn error(&self) -> Option<DataSourceError> {
        self.tx.borrow().error.clone()
    }

    /// True once the request will emit nothing further.
    pub fn is_completed(&self) -> bool {
        self.tx.borrow().completed
    }

    /// Subscribe to state snapshots. The current state counts as seen;
    /// observers wake on the next change.
    pub fn updates(&self) -> watch::Receiver<RequestState> {
        self.tx.subscribe()
    }

    /// Emit tile bytes, optionally completing the request.
    ///
    /// Emitting bytes identical to the current data is a no-op, including
    /// the completion flag, and returns `false`; observers are not woken.
    /// The caller decides whether to complete explicitly in that case.
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty or the request already completed.
    pub fn emit_data(&self, data: Bytes, complete: bool) -> bool {
        assert!(!data.is_empty(), "emitted tile data must not be empty");
        {
            let state = self.tx.borrow();
            assert!(!state.completed, "data emitted on a completed request");
            if state.data.as_ref() == Some(&data) {
                return false;
            }
        }
        self.tx.send_modify(|state| {
            state.data = Some(data);
            if complete {
                state.completed = true;
            }
        });
        true
    }

    /// Fail the request. Clears any intermediate data so observers never
    /// act on bytes the source has disowned, and completes the request.
    ///
    /// # Panics
    ///
    /// Panics if the request already completed.
    pub fn emit_error(&self, error: DataSourceError) {
        assert!(
            !self.tx.borrow().completed,
            "error emitted on a completed request"
        );
        self.tx.send_modify(|state| {
            state.error = Some(error);
            state.data = None;
            state.completed = true;
        });
    }

    /// Complete the request with whatever was already emitted.
    ///
    /// # Panics
    ///
    /// Panics if the request already completed, or if neither data nor an
    /// error was emitted first.
    pub fn complete(&self) {
        {
            let state = self.tx.borrow();
            assert!(!state.completed, "request completed twice");
            assert!(
                state.data.is_some() || state.error.is_some(),
                "request completed without emitting data or an error"
            );
        }
        self.tx.send_modify(|state| {
            state.completed = true;
        });
    }

    /// Wait for the request to complete and return its final result,
    /// ignoring intermediate emissions.
    pub async fn wait(&self) -> Result<Bytes, DataSourceError> {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| state.completed).await {
            Ok(state) => state.clone(),
            // The sender lives in self, so this branch is unreachable
            // while a caller holds the request.
            Err(_) => return Err(DataSourceError::Cancelled),
        };
        if let Some(error) = state.error {
            Err(error)
        } else if let Some(data) = state.data {
            Ok(data)
        } else {
            Err(DataSourceError::Cancelled)
        }
    }
}

impl std::fmt::Debug for TileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.tx.borrow();
        f.debug_struct("TileRequest")
            .field("coord", &self.coord)
            .field("has_data", &state.data.is_some())
            .field("error", &state.error)
            .field("completed", &state.completed)
            .finish()
    }
}
