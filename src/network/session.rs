//! Game Session Orchestration
//!
//! Connects the transport to the game: every client action is applied to
//! the single [`GameState`] behind one async mutex, and the resulting
//! messages are queued while the lock is still held so no client sees a
//! broadcast ahead of the mutation it reports.
//!
//! Queuing never waits. A connection whose outbound queue is full (or whose
//! writer is gone) is dropped from the session and its [`Outbox`] is
//! signalled, so the transport closes it and reports the disconnect.
//!
//! Prover calls never run under the lock. They are bracketed by the
//! [`ZkGate`], and their results are applied only when the game they were
//! started in is still the live one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn, instrument};

use crate::game::reset::{ResetDebouncer, ResetDecision, DEFAULT_RESET_COOLDOWN};
use crate::game::rules::Role;
use crate::game::state::{ConnectionId, GameError, GameState, RevealOutcome, Turn};
use crate::network::protocol::{
    CommitRequest, CommitmentGenerated, CommitmentRequest, GameResult, GameStateView,
    PlayerAssigned, RevealRequest, ServerMessage,
};
use crate::prover::{ProverBridge, ZkGate};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cooldown after an accepted reset.
    pub reset_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_cooldown: DEFAULT_RESET_COOLDOWN,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            reset_cooldown: std::env::var("RESET_COOLDOWN_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RESET_COOLDOWN),
        }
    }
}

/// Outbound side of one connection, as held by the session.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
    evicted: Arc<Notify>,
}

impl Outbox {
    /// Wrap the queue feeding a connection's writer.
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            tx,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Resolves once the session has dropped this connection.
    pub async fn evicted(&self) {
        self.evicted.notified().await
    }

    /// Queue without waiting. `false` when the queue is full or closed.
    fn offer(&self, message: ServerMessage) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

/// State guarded by the session lock.
struct SessionInner {
    state: GameState,
    /// Every open connection, seated or not.
    connections: BTreeMap<ConnectionId, Outbox>,
    debouncer: ResetDebouncer,
}

impl SessionInner {
    fn broadcast(&mut self, message: ServerMessage) {
        let stalled: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, outbox)| !outbox.offer(message.clone()))
            .map(|(id, _)| *id)
            .collect();
        for connection in stalled {
            self.evict(connection);
        }
    }

    fn send_to(&mut self, connection: ConnectionId, message: ServerMessage) {
        let delivered = match self.connections.get(&connection) {
            Some(outbox) => outbox.offer(message),
            None => return,
        };
        if !delivered {
            self.evict(connection);
        }
    }

    fn evict(&mut self, connection: ConnectionId) {
        if let Some(outbox) = self.connections.remove(&connection) {
            warn!(%connection, "outbound queue full or closed, dropping connection");
            // notify_one keeps the permit if the transport is not waiting yet.
            outbox.evicted.notify_one();
        }
    }
}

/// The process-wide game session.
pub struct GameSession {
    inner: Mutex<SessionInner>,
    gate: ZkGate,
    prover: Arc<dyn ProverBridge>,
}

impl GameSession {
    /// Create a session with a fresh game.
    pub fn new(prover: Arc<dyn ProverBridge>, config: SessionConfig) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: GameState::new(),
                connections: BTreeMap::new(),
                debouncer: ResetDebouncer::new(config.reset_cooldown),
            }),
            gate: ZkGate::new(),
            prover,
        }
    }

    /// Whether a prover operation is in flight.
    pub fn zk_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Current client-facing snapshot.
    pub async fn snapshot(&self) -> GameStateView {
        let inner = self.inner.lock().await;
        self.view(&inner)
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    fn view(&self, inner: &SessionInner) -> GameStateView {
        GameStateView::new(&inner.state, self.gate.is_busy())
    }

    fn broadcast_state(&self, inner: &mut SessionInner, message: Option<String>) {
        let view = self.view(inner);
        inner.broadcast(ServerMessage::state(view, message));
    }

    fn reject(&self, inner: &mut SessionInner, connection: ConnectionId, err: GameError) {
        debug!(%connection, error = %err, "request rejected");
        inner.send_to(connection, ServerMessage::error(err.to_string()));
    }

    // =========================================================================
    // SLOTS
    // =========================================================================

    /// Seat a new connection.
    ///
    /// On `GameFull` the connection is told so and not registered; the
    /// caller closes it.
    #[instrument(skip(self, outbox))]
    pub async fn connect(&self, connection: ConnectionId, outbox: Outbox) -> Result<Role, GameError> {
        let mut inner = self.inner.lock().await;
        match inner.state.assign(connection) {
            Ok(role) => {
                inner.connections.insert(connection, outbox);
                info!(%connection, %role, "player assigned");
                self.announce_join(&mut inner, connection, role);
                Ok(role)
            }
            Err(err) => {
                warn!(%connection, "game full, rejecting connection");
                outbox.offer(ServerMessage::error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Claim a free slot for an already-open connection.
    pub async fn join_game(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(role) = inner.state.role_of(connection) {
            inner.send_to(connection, ServerMessage::PlayerAssigned(PlayerAssigned { player_id: role }));
            return;
        }

        match inner.state.assign(connection) {
            Ok(role) => {
                info!(%connection, %role, "player re-joined");
                self.announce_join(&mut inner, connection, role);
            }
            Err(err) => self.reject(&mut inner, connection, err),
        }
    }

    fn announce_join(&self, inner: &mut SessionInner, connection: ConnectionId, role: Role) {
        inner.send_to(connection, ServerMessage::PlayerAssigned(PlayerAssigned { player_id: role }));
        let message = format!("{} joined. Current Turn: {}", role, inner.state.turn());
        self.broadcast_state(inner, Some(message));
    }

    /// Connection closed.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock().await;
        inner.connections.remove(&connection);

        let Some(role) = inner.state.vacate(connection) else {
            debug!(%connection, "unseated connection closed");
            return;
        };

        if inner.state.turn() == Turn::GameOver {
            info!(%role, "player left after game over");
            self.broadcast_state(&mut inner, Some(format!("{} disconnected after game over.", role)));
            return;
        }

        match inner.debouncer.force() {
            ResetDecision::Accepted => {
                info!(%role, "player left mid-game, resetting");
                inner.state.reset();
                self.broadcast_state(
                    &mut inner,
                    Some(format!("Player {} disconnected. Game has been reset.", role)),
                );
            }
            _ => {
                info!(%role, "player left mid-game during reset cooldown");
                self.broadcast_state(&mut inner, Some("Game is resetting...".to_string()));
            }
        }
        inner.broadcast(ServerMessage::GameResetSignal);
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// `get_commitment`: derive commitment parameters for the requester.
    #[instrument(skip(self, request), fields(role = %request.player_id))]
    pub async fn get_commitment(&self, connection: ConnectionId, request: CommitmentRequest) {
        let role = request.player_id;
        let salt = request.salt_text();

        let (ticket, permit) = {
            let mut inner = self.inner.lock().await;
            let started = inner
                .state
                .authenticate(role, connection)
                .and_then(|_| self.gate.try_acquire().ok_or(GameError::ServerBusy))
                .and_then(|permit| {
                    inner
                        .state
                        .begin_commitment(role, connection, request.move_code(), salt.as_deref())
                        .map(|ticket| (ticket, permit))
                });
            match started {
                Ok(started) => {
                    inner.broadcast(ServerMessage::loading(true, format!("Generating commitment for {}...", role)));
                    started
                }
                Err(err) => {
                    self.reject(&mut inner, connection, err);
                    return;
                }
            }
        };

        let derived = self.prover.derive_commitment(ticket.mv, &ticket.salt).await;

        let mut inner = self.inner.lock().await;
        let applied = derived.map_err(GameError::from).and_then(|commitment| {
            inner
                .state
                .complete_commitment(&ticket, commitment.clone())
                .map(|_| commitment)
        });

        match applied {
            Ok(commitment) => {
                info!(%role, %commitment, "commitment parameters issued");
                inner.send_to(
                    connection,
                    ServerMessage::CommitmentGenerated(CommitmentGenerated {
                        player_id: role,
                        commitment,
                        mv: ticket.mv,
                        salt: ticket.salt.clone(),
                    }),
                );
            }
            Err(err) => {
                warn!(%role, error = %err, "commitment derivation failed");
                if err != GameError::SessionChanged {
                    inner.state.note(format!("Commitment generation failed for {}.", role));
                }
                inner.send_to(connection, ServerMessage::error(format!("Commitment failed: {}", err)));
            }
        }

        permit.release();
        inner.broadcast(ServerMessage::loading(false, ""));
        self.broadcast_state(&mut inner, None);
    }

    /// `player_commit`: confirm the issued commitment.
    #[instrument(skip(self, request), fields(role = %request.player_id))]
    pub async fn player_commit(&self, connection: ConnectionId, request: CommitRequest) {
        let mut inner = self.inner.lock().await;
        match inner
            .state
            .confirm_commit(request.player_id, connection, &request.commitment)
        {
            Ok(turn) => {
                info!(role = %request.player_id, %turn, "commit confirmed");
                self.broadcast_state(&mut inner, None);
            }
            Err(err) => self.reject(&mut inner, connection, err),
        }
    }

    // =========================================================================
    // REVEAL
    // =========================================================================

    /// `player_reveal`: verify the stored move with the reveal circuit.
    #[instrument(skip(self, request), fields(role = %request.player_id))]
    pub async fn player_reveal(&self, connection: ConnectionId, request: RevealRequest) {
        let role = request.player_id;

        let (ticket, permit) = {
            let mut inner = self.inner.lock().await;
            let started = inner
                .state
                .authenticate(role, connection)
                .and_then(|_| self.gate.try_acquire().ok_or(GameError::ServerBusy))
                .and_then(|permit| {
                    inner
                        .state
                        .begin_reveal(role, connection)
                        .map(|ticket| (ticket, permit))
                });
            match started {
                Ok(started) => {
                    inner.broadcast(ServerMessage::loading(true, format!("Verifying {}'s move...", role)));
                    started
                }
                Err(err) => {
                    self.reject(&mut inner, connection, err);
                    return;
                }
            }
        };

        let sealed = &ticket.sealed;
        let checked = self
            .prover
            .verify_reveal(sealed.mv, &sealed.salt, &sealed.commitment)
            .await;

        let mut inner = self.inner.lock().await;
        let applied = checked
            .map_err(GameError::from)
            .and_then(|verified| inner.state.complete_reveal(&ticket, verified));

        match applied {
            Ok(RevealOutcome::AwaitingOpponent) => {
                info!(%role, "reveal verified");
            }
            Ok(RevealOutcome::Decided(verdict)) => {
                info!(%role, winner = %verdict.winner, "game decided");
                inner.broadcast(ServerMessage::GameResult(GameResult {
                    winner: verdict.winner,
                    p1_move: verdict.p1_move,
                    p2_move: verdict.p2_move,
                    message: verdict.message,
                }));
            }
            Ok(RevealOutcome::Unresolved) => {
                warn!(%role, "game over without two verified proofs");
                inner.broadcast(ServerMessage::info("Game over, but one or more proofs failed verification."));
            }
            Ok(RevealOutcome::Rejected { winner }) => {
                warn!(%role, ?winner, "reveal proof rejected");
                inner.send_to(connection, ServerMessage::error("ZK proof verification failed."));
            }
            Err(err) => {
                warn!(%role, error = %err, "reveal could not be checked");
                if err != GameError::SessionChanged {
                    inner.state.note(format!("ZK verification for {} could not run.", role));
                }
                self.reject(&mut inner, connection, err);
            }
        }

        permit.release();
        inner.broadcast(ServerMessage::loading(false, ""));
        self.broadcast_state(&mut inner, None);
    }

    // =========================================================================
    // RESET
    // =========================================================================

    /// `reset_game`: debounced user reset.
    #[instrument(skip(self))]
    pub async fn reset_game(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let eligible = inner.state.reset_eligible();

        match inner.debouncer.request(eligible) {
            ResetDecision::Accepted => {
                inner.state.reset();
                info!(epoch = inner.state.epoch(), "game reset");
                self.broadcast_state(&mut inner, Some("Game has been reset. New game starting.".to_string()));
                inner.broadcast(ServerMessage::GameResetSignal);
            }
            ResetDecision::Coalesced => {
                debug!("reset request inside cooldown");
                self.broadcast_state(&mut inner, Some("Game is resetting...".to_string()));
                inner.broadcast(ServerMessage::GameResetSignal);
            }
            ResetDecision::Refused => {
                let turn = inner.state.turn();
                debug!(%turn, "reset refused");
                inner.send_to(
                    connection,
                    ServerMessage::info(format!(
                        "Game cannot be reset now (Phase: {}). Wait for game to end.",
                        turn
                    )),
                );
                let view = self.view(&inner);
                inner.send_to(
                    connection,
                    ServerMessage::state(view, Some(format!("Current game phase: {}", turn))),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::{Move, Winner};
    use crate::prover::MockProver;
    use serde_json::json;

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn errors(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::ErrorMessage(n) => Some(n.message),
                    _ => None,
                })
                .collect()
        }
    }

    fn session_with(prover: Arc<MockProver>) -> Arc<GameSession> {
        Arc::new(GameSession::new(prover, SessionConfig::default()))
    }

    async fn connect(session: &GameSession) -> (Client, Result<Role, GameError>) {
        let (tx, rx) = mpsc::channel(256);
        let id = ConnectionId::new();
        let result = session.connect(id, Outbox::new(tx)).await;
        (Client { id, rx }, result)
    }

    fn commitment_request(role: Role, mv: u8, salt: &str) -> CommitmentRequest {
        CommitmentRequest {
            player_id: role,
            mv: json!(mv),
            salt: json!(salt),
        }
    }

    async fn commit(session: &GameSession, client: &mut Client, role: Role, mv: u8, salt: &str) {
        session
            .get_commitment(client.id, commitment_request(role, mv, salt))
            .await;
        let commitment = client
            .drain()
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::CommitmentGenerated(c) => Some(c.commitment),
                _ => None,
            })
            .unwrap();
        session
            .player_commit(client.id, CommitRequest { player_id: role, commitment })
            .await;
    }

    async fn committed_pair(session: &GameSession) -> (Client, Client) {
        let (mut p1, _) = connect(session).await;
        let (mut p2, _) = connect(session).await;
        commit(session, &mut p1, Role::P1, 0, "abc").await;
        commit(session, &mut p2, Role::P2, 2, "def").await;
        p1.drain();
        p2.drain();
        (p1, p2)
    }

    async fn wait_until_busy(session: &GameSession) {
        while !session.zk_busy() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_third_connection_rejected() {
        let session = session_with(Arc::new(MockProver::new()));
        let (_p1, r1) = connect(&session).await;
        let (_p2, r2) = connect(&session).await;
        let (mut p3, r3) = connect(&session).await;

        assert_eq!(r1.unwrap(), Role::P1);
        assert_eq!(r2.unwrap(), Role::P2);
        assert_eq!(r3.unwrap_err(), GameError::GameFull);
        assert_eq!(p3.errors(), vec!["Game is full. Please try again later.".to_string()]);
        assert_eq!(session.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_commitment_issued_to_requester_only() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, _) = connect(&session).await;
        let (mut p2, _) = connect(&session).await;
        p1.drain();
        p2.drain();

        session
            .get_commitment(p1.id, commitment_request(Role::P1, 1, "abc"))
            .await;

        let issued = p1.drain().into_iter().find_map(|m| match m {
            ServerMessage::CommitmentGenerated(c) => Some(c),
            _ => None,
        });
        let issued = issued.unwrap();
        assert_eq!(issued.salt, "0xabc");
        assert_eq!(issued.mv, Move::Paper);
        assert_eq!(issued.commitment, MockProver::commitment_for(Move::Paper, "0xabc"));

        let seen_by_p2 = p2.drain();
        assert!(seen_by_p2
            .iter()
            .all(|m| !matches!(m, ServerMessage::CommitmentGenerated(_))));
        assert!(seen_by_p2
            .iter()
            .any(|m| matches!(m, ServerMessage::LoadingUpdate(l) if !l.is_loading)));
        assert!(!session.zk_busy());
    }

    #[tokio::test]
    async fn test_role_authentication() {
        let prover = Arc::new(MockProver::new());
        let session = session_with(prover.clone());
        let (_p1, _) = connect(&session).await;
        let (mut p2, _) = connect(&session).await;
        p2.drain();

        session
            .get_commitment(p2.id, commitment_request(Role::P1, 0, "abc"))
            .await;
        let errors = p2.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Role authentication failed"));
        assert_eq!(prover.calls(), 0);
        assert!(session.snapshot().await.players.p1.unwrap().commitment.is_none());
    }

    #[tokio::test]
    async fn test_full_game_rock_beats_scissors() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, mut p2) = committed_pair(&session).await;
        assert_eq!(session.snapshot().await.current_turn, Turn::P1Reveal);

        session.player_reveal(p1.id, RevealRequest { player_id: Role::P1 }).await;
        assert_eq!(session.snapshot().await.current_turn, Turn::P2Reveal);
        session.player_reveal(p2.id, RevealRequest { player_id: Role::P2 }).await;

        for client in [&mut p1, &mut p2] {
            let result = client.drain().into_iter().find_map(|m| match m {
                ServerMessage::GameResult(r) => Some(r),
                _ => None,
            });
            let result = result.unwrap();
            assert_eq!(result.winner, Winner::P1);
            assert_eq!(result.p1_move, Some(Move::Rock));
            assert_eq!(result.p2_move, Some(Move::Scissors));
        }

        let view = session.snapshot().await;
        assert_eq!(view.current_turn, Turn::GameOver);
        assert_eq!(view.winner, Some(Winner::P1));
        assert_eq!(view.players.p2.unwrap().mv, Some(Move::Scissors));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reveal_while_busy() {
        let prover = Arc::new(MockProver::new().with_delay(Duration::from_millis(500)));
        let session = session_with(prover.clone());
        let (mut p1, _p2) = committed_pair(&session).await;
        let calls_before = prover.calls();

        let task = {
            let session = session.clone();
            let id = p1.id;
            tokio::spawn(async move { session.player_reveal(id, RevealRequest { player_id: Role::P1 }).await })
        };
        wait_until_busy(&session).await;

        session.player_reveal(p1.id, RevealRequest { player_id: Role::P1 }).await;
        let errors = p1.errors();
        assert!(errors.iter().any(|e| e.contains("busy")), "{:?}", errors);
        assert_eq!(session.snapshot().await.current_turn, Turn::P1Reveal);

        task.await.unwrap();
        assert_eq!(prover.calls(), calls_before + 1);
        assert_eq!(session.snapshot().await.current_turn, Turn::P2Reveal);
        assert!(!session.zk_busy());
    }

    #[tokio::test]
    async fn test_failed_proof_awards_opponent() {
        let prover = Arc::new(MockProver::new());
        let session = session_with(prover.clone());
        let (mut p1, _p2) = committed_pair(&session).await;

        prover.set_reject_reveals(true);
        session.player_reveal(p1.id, RevealRequest { player_id: Role::P1 }).await;

        assert_eq!(p1.errors(), vec!["ZK proof verification failed.".to_string()]);
        let view = session.snapshot().await;
        assert_eq!(view.current_turn, Turn::GameOver);
        assert_eq!(view.winner, Some(Winner::P2));
        assert_eq!(view.players.p1.unwrap().proof_verified, Some(false));
    }

    #[tokio::test]
    async fn test_prover_failure_leaves_participant_uncommitted() {
        let prover = Arc::new(MockProver::new());
        let session = session_with(prover.clone());
        let (mut p1, _) = connect(&session).await;
        p1.drain();

        prover.set_fail_invocations(true);
        session
            .get_commitment(p1.id, commitment_request(Role::P1, 0, "abc"))
            .await;
        let errors = p1.errors();
        assert!(errors[0].starts_with("Commitment failed"));

        let view = session.snapshot().await;
        let me = view.players.p1.unwrap();
        assert!(me.commitment.is_none());
        assert!(!me.has_committed);
        assert!(!view.is_processing_zk);

        // Gate released: a retry goes through.
        prover.set_fail_invocations(false);
        session
            .get_commitment(p1.id, commitment_request(Role::P1, 0, "abc"))
            .await;
        assert!(session.snapshot().await.players.p1.unwrap().commitment.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_game_resets_and_coalesces() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, p2) = committed_pair(&session).await;
        assert_eq!(session.snapshot().await.current_turn, Turn::P1Reveal);

        session.disconnect(p2.id).await;
        let seen = p1.drain();
        assert!(seen.iter().any(|m| matches!(
            m,
            ServerMessage::GameStateUpdate(u)
                if u.message.as_deref() == Some("Player P2 disconnected. Game has been reset.")
        )));
        assert!(matches!(seen.last(), Some(ServerMessage::GameResetSignal)));

        let view = session.snapshot().await;
        assert_eq!(view.current_turn, Turn::P1Commit);
        assert!(view.players.p1.is_none() && view.players.p2.is_none());
        assert_eq!(view.message_log.len(), 1);

        // A newcomer takes a seat in the fresh game.
        let (mut p3, seated) = connect(&session).await;
        assert_eq!(seated.unwrap(), Role::P1);
        p3.drain();
        let before = session.snapshot().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        session.reset_game(p1.id).await;

        let seen = p3.drain();
        assert!(seen.iter().any(|m| matches!(
            m,
            ServerMessage::GameStateUpdate(u) if u.message.as_deref() == Some("Game is resetting...")
        )));
        assert!(matches!(seen.last(), Some(ServerMessage::GameResetSignal)));

        // Nothing was replaced: the newcomer keeps the seat and the log is untouched.
        let after = session.snapshot().await;
        assert_eq!(after.players.p1.map(|p| p.id), Some(Role::P1));
        assert_eq!(after.message_log, before.message_log);
        assert_eq!(after.current_turn, Turn::P1Commit);
        session
            .get_commitment(p3.id, commitment_request(Role::P1, 1, "abc"))
            .await;
        assert!(session.snapshot().await.players.p1.unwrap().commitment.is_some());
    }

    #[tokio::test]
    async fn test_loading_brackets_commitment() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, _p2) = connect(&session).await;
        p1.drain();

        session
            .get_commitment(p1.id, commitment_request(Role::P1, 2, "abc"))
            .await;
        let seen = p1.drain();

        let started = seen
            .iter()
            .position(|m| matches!(m, ServerMessage::LoadingUpdate(l) if l.is_loading))
            .unwrap();
        let issued = seen
            .iter()
            .position(|m| matches!(m, ServerMessage::CommitmentGenerated(_)))
            .unwrap();
        let finished = seen
            .iter()
            .position(|m| matches!(m, ServerMessage::LoadingUpdate(l) if !l.is_loading))
            .unwrap();

        assert!(started < issued && issued < finished);
        match seen.last() {
            Some(ServerMessage::GameStateUpdate(u)) => {
                assert!(!u.game_state.is_processing_zk);
                assert!(u.game_state.players.p1.as_ref().unwrap().commitment.is_some());
            }
            other => panic!("expected final state update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unread_client_is_dropped_instead_of_blocking() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, _) = connect(&session).await;

        // Room for the join messages only; never drained.
        let (tx, _unread) = mpsc::channel(2);
        let stalled = ConnectionId::new();
        let outbox = Outbox::new(tx);
        assert_eq!(session.connect(stalled, outbox.clone()).await.unwrap(), Role::P2);

        let played = tokio::time::timeout(Duration::from_secs(1), async {
            commit(&session, &mut p1, Role::P1, 0, "abc").await;
            for _ in 0..10 {
                session.reset_game(stalled).await;
            }
        })
        .await;
        assert!(played.is_ok());
        assert!(!session.zk_busy());
        assert_eq!(session.connection_count().await, 1);
        assert!(tokio::time::timeout(Duration::from_secs(1), outbox.evicted()).await.is_ok());

        // The transport then reports the close, which frees the seat as usual.
        session.disconnect(stalled).await;
        let view = session.snapshot().await;
        assert_eq!(view.current_turn, Turn::P1Commit);
        assert!(view.players.p2.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_after_reset() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, _) = connect(&session).await;
        session.reset_game(p1.id).await;
        assert!(session.snapshot().await.players.p1.is_none());
        p1.drain();

        session.join_game(p1.id).await;
        let assigned = p1.drain().into_iter().find_map(|m| match m {
            ServerMessage::PlayerAssigned(a) => Some(a.player_id),
            _ => None,
        });
        assert_eq!(assigned, Some(Role::P1));
    }

    #[tokio::test]
    async fn test_reset_refused_mid_game() {
        let session = session_with(Arc::new(MockProver::new()));
        let (mut p1, mut p2) = committed_pair(&session).await;

        session.reset_game(p2.id).await;
        let info = p2.drain().into_iter().find_map(|m| match m {
            ServerMessage::InfoMessage(n) => Some(n.message),
            _ => None,
        });
        assert_eq!(
            info.as_deref(),
            Some("Game cannot be reset now (Phase: P1_REVEAL). Wait for game to end.")
        );
        assert!(p1.drain().is_empty());
        assert_eq!(session.snapshot().await.current_turn, Turn::P1Reveal);
    }

    #[tokio::test]
    async fn test_disconnect_after_game_over_keeps_result() {
        let session = session_with(Arc::new(MockProver::new()));
        let (p1, mut p2) = committed_pair(&session).await;
        session.player_reveal(p1.id, RevealRequest { player_id: Role::P1 }).await;
        session.player_reveal(p2.id, RevealRequest { player_id: Role::P2 }).await;
        p2.drain();

        session.disconnect(p1.id).await;
        let seen = p2.drain();
        assert!(seen.iter().all(|m| !matches!(m, ServerMessage::GameResetSignal)));
        let view = session.snapshot().await;
        assert_eq!(view.winner, Some(Winner::P1));
        assert!(view.players.p1.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_commitment_discarded() {
        let prover = Arc::new(MockProver::new().with_delay(Duration::from_millis(300)));
        let session = session_with(prover.clone());
        let (p1, _) = connect(&session).await;
        let (mut p2, _) = connect(&session).await;

        let task = {
            let session = session.clone();
            let id = p1.id;
            tokio::spawn(async move {
                session
                    .get_commitment(id, commitment_request(Role::P1, 0, "abc"))
                    .await
            })
        };
        wait_until_busy(&session).await;

        session.disconnect(p1.id).await;
        session.join_game(p2.id).await;
        task.await.unwrap();

        // The reset emptied both slots; P2's connection now holds P1.
        let view = session.snapshot().await;
        assert!(view.players.p1.unwrap().commitment.is_none());
        assert!(!view.is_processing_zk);
        assert!(p2
            .drain()
            .iter()
            .all(|m| !matches!(m, ServerMessage::CommitmentGenerated(_))));
    }
}
