// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use futures::future::join_all;
use std::{collections::BTreeMap, future::Future, pin::Pin, time::Duration};
use tokio::{
    select,
    sync::{mpsc, watch},
    time::{sleep, Sleep},
};

use crate::{
    BridgedLeg, CompositionInput, CompositorSupervisor, Error, Grid, Layout, MediaBridge,
    MediaKind, ParticipantId, Result, Size, View,
};

/// Requests to the [`StreamOrchestrator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A participant started to publish a stream
    PublishingStarted {
        participant: ParticipantId,
        kind: MediaKind,
        producer_id: String,
    },
    /// A participant stopped to publish a stream
    PublishingStopped {
        participant: ParticipantId,
        kind: MediaKind,
    },
    /// A participant left the call
    Left { participant: ParticipantId },
    /// Stop composing and release everything
    Shutdown,
}

/// Parameters of a [`StreamOrchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorParameters {
    /// Quiet period after a membership change before recomposing
    pub debounce: Duration,
    /// Pause after stopping a transcoder before starting the next one
    pub settle_delay: Duration,
    /// Resolution of the composed picture
    pub canvas: Size,
}

impl Default for OrchestratorParameters {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            settle_delay: Duration::from_secs(3),
            canvas: Size::FHD,
        }
    }
}

/// Phase of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing is composed
    #[default]
    Idle,
    /// The membership changed, the recomposition of the given generation is scheduled or
    /// in progress
    Composing(u64),
    /// The transcoder runs with the current membership
    Stable,
}

/// Snapshot of the orchestrator published after every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub phase: Phase,
    /// Membership generation
    pub generation: u64,
    /// Admitted participants in join order
    pub participants: Vec<ParticipantId>,
    /// Participants the running transcoder composes
    pub composed: Vec<ParticipantId>,
    /// Recompositions which started a transcoder
    pub passes: u64,
    /// Recompositions dropped because the membership changed meanwhile
    pub superseded: u64,
    /// Recompositions which failed to start a transcoder
    pub failures: u64,
}

/// Sends commands to a running [`StreamOrchestrator`] and observes its status.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<OrchestratorStatus>,
}

impl OrchestratorHandle {
    /// # Errors
    ///
    /// Fails if the orchestrator is gone.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::OrchestratorClosed)
    }

    pub async fn publishing_started(
        &self,
        participant: ParticipantId,
        kind: MediaKind,
        producer_id: &str,
    ) -> Result<()> {
        self.send(Command::PublishingStarted {
            participant,
            kind,
            producer_id: producer_id.to_string(),
        })
        .await
    }

    pub async fn publishing_stopped(&self, participant: ParticipantId, kind: MediaKind) -> Result<()> {
        self.send(Command::PublishingStopped { participant, kind })
            .await
    }

    pub async fn left(&self, participant: ParticipantId) -> Result<()> {
        self.send(Command::Left { participant }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Latest status
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status fulfills `condition`.
    ///
    /// # Errors
    ///
    /// Fails if the orchestrator is gone.
    pub async fn wait_for(
        &mut self,
        condition: impl FnMut(&OrchestratorStatus) -> bool,
    ) -> Result<OrchestratorStatus> {
        self.status
            .wait_for(condition)
            .await
            .map(|status| status.clone())
            .map_err(|_| Error::OrchestratorClosed)
    }
}

#[derive(Debug)]
struct Leg {
    producer_id: String,
    bridged: Option<BridgedLeg>,
}

#[derive(Debug)]
struct Participant {
    id: ParticipantId,
    legs: BTreeMap<MediaKind, Leg>,
    view: Option<View>,
}

/// Everything changed by commands, also while a recomposition waits.
#[derive(Debug)]
struct Membership {
    participants: Vec<Participant>,
    generation: u64,
    debounce_period: Duration,
    debounce: Option<Pin<Box<Sleep>>>,
    commands: mpsc::Receiver<Command>,
    closing: bool,
    status: OrchestratorStatus,
    status_tx: watch::Sender<OrchestratorStatus>,
}

/// Keeps the transcoder composing the current participants.
///
/// Membership changes are collected until the debounce period passed without another change.
/// Then the transcoder is restarted with a freshly computed grid. A recomposition is abandoned
/// as soon as the membership changed while it was waiting.
#[derive(Debug)]
pub struct StreamOrchestrator {
    membership: Membership,
    bridge: MediaBridge,
    supervisor: CompositorSupervisor,
    params: OrchestratorParameters,
}

impl StreamOrchestrator {
    #[must_use]
    pub fn new(
        bridge: MediaBridge,
        supervisor: CompositorSupervisor,
        params: OrchestratorParameters,
    ) -> (Self, OrchestratorHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(OrchestratorStatus::default());

        let orchestrator = Self {
            membership: Membership {
                participants: vec![],
                generation: 0,
                debounce_period: params.debounce,
                debounce: None,
                commands: commands_rx,
                closing: false,
                status: OrchestratorStatus::default(),
                status_tx,
            },
            bridge,
            supervisor,
            params,
        };
        let handle = OrchestratorHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (orchestrator, handle)
    }

    /// Run the control loop until [`Command::Shutdown`] or until all handles are dropped,
    /// then tear everything down.
    pub async fn run(self) {
        let Self {
            mut membership,
            bridge,
            mut supervisor,
            params,
        } = self;

        while !membership.closing {
            select! {
                command = membership.commands.recv() => match command {
                    Some(command) => membership.apply(command, &bridge).await,
                    None => membership.closing = true,
                },
                () = debounced(&mut membership.debounce) => {
                    membership.debounce = None;
                    let generation = membership.generation;
                    recompose(&mut membership, &bridge, &mut supervisor, &params, generation).await;
                }
                exit = supervisor.next_exit() => {
                    if let Some(e) = supervisor.reap(exit) {
                        error!("{e}, waiting for the next membership change");
                        membership.status.composed.clear();
                        membership.settle(Phase::Idle);
                    }
                }
            }
        }

        teardown(&mut membership, &bridge, &mut supervisor).await;
    }
}

async fn debounced(debounce: &mut Option<Pin<Box<Sleep>>>) {
    match debounce {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Await `future` while still applying incoming commands.
async fn drive<F: Future>(membership: &mut Membership, bridge: &MediaBridge, future: F) -> F::Output {
    tokio::pin!(future);
    loop {
        select! {
            biased;
            output = &mut future => return output,
            command = membership.commands.recv(), if !membership.closing => match command {
                Some(command) => membership.apply(command, bridge).await,
                None => membership.closing = true,
            },
        }
    }
}

async fn recompose(
    membership: &mut Membership,
    bridge: &MediaBridge,
    supervisor: &mut CompositorSupervisor,
    params: &OrchestratorParameters,
    generation: u64,
) {
    info!("Recomposing generation {generation}");
    membership.status.phase = Phase::Composing(generation);
    membership.publish();

    let had_process = supervisor.has_process();
    drive(membership, bridge, supervisor.stop()).await;
    membership.status.composed.clear();
    if had_process && !params.settle_delay.is_zero() {
        drive(membership, bridge, sleep(params.settle_delay)).await;
    }

    if membership.is_stale(generation) {
        membership.supersede(generation);
        return;
    }

    if membership.participants.is_empty() {
        debug!("Nobody to compose");
        membership.settle(Phase::Idle);
        return;
    }

    membership.assign_layout(params.canvas);

    let pending = membership.pending_legs();
    if !pending.is_empty() {
        let results = drive(
            membership,
            bridge,
            join_all(
                pending
                    .iter()
                    .map(|(participant, kind, producer_id)| bridge.bridge(participant, *kind, producer_id)),
            ),
        )
        .await;

        for ((participant, kind, producer_id), result) in pending.into_iter().zip(results) {
            match result {
                Ok(leg) => membership.attach(leg, &producer_id, bridge).await,
                Err(e) => warn!("Leaving {kind} of {participant} out: {e}"),
            }
        }
    }

    if membership.is_stale(generation) {
        membership.supersede(generation);
        return;
    }

    let inputs = membership.inputs();
    let composed: Vec<ParticipantId> = inputs
        .iter()
        .filter(|input| input.is_ready())
        .map(|input| input.participant.clone())
        .collect();

    match drive(membership, bridge, supervisor.start(&inputs)).await {
        Ok(()) => {
            info!("Composing {} participant(s)", composed.len());
            membership.status.composed = composed;
            membership.status.passes += 1;
            membership.settle(Phase::Stable);
        }
        Err(e) => {
            error!("Unable to start composition of generation {generation}: {e}");
            membership.status.failures += 1;
            membership.settle(Phase::Idle);
        }
    }
}

async fn teardown(
    membership: &mut Membership,
    bridge: &MediaBridge,
    supervisor: &mut CompositorSupervisor,
) {
    info!("Tearing down composition");

    supervisor.stop().await;
    for participant in membership.participants.drain(..) {
        for (_, leg) in participant.legs {
            if let Some(bridged) = leg.bridged {
                bridge.release(bridged).await;
            }
        }
    }
    bridge.ports().clear();
    bridge.remove_all_descriptors().await;

    membership.debounce = None;
    membership.status.composed.clear();
    membership.status.phase = Phase::Idle;
    membership.publish();
}

impl Membership {
    async fn apply(&mut self, command: Command, bridge: &MediaBridge) {
        debug!("Applying {command:?}");

        match command {
            Command::PublishingStarted {
                participant,
                kind,
                producer_id,
            } => {
                let index = match self.position(&participant) {
                    Some(index) => index,
                    None => {
                        self.participants.push(Participant {
                            id: participant,
                            legs: BTreeMap::new(),
                            view: None,
                        });
                        self.participants.len() - 1
                    }
                };
                let legs = &mut self.participants[index].legs;
                if legs
                    .get(&kind)
                    .is_some_and(|leg| leg.producer_id == producer_id)
                {
                    debug!("{kind} of {} is already known", self.participants[index].id);
                    return;
                }
                let replaced = legs.insert(
                    kind,
                    Leg {
                        producer_id,
                        bridged: None,
                    },
                );
                if let Some(bridged) = replaced.and_then(|leg| leg.bridged) {
                    bridge.release(bridged).await;
                }
            }
            Command::PublishingStopped { participant, kind } => {
                let Some(index) = self.position(&participant) else {
                    debug!("Ignoring stopped {kind} of unknown participant {participant}");
                    return;
                };
                let Some(leg) = self.participants[index].legs.remove(&kind) else {
                    debug!("Ignoring stopped {kind} of {participant} which was not published");
                    return;
                };
                if let Some(bridged) = leg.bridged {
                    bridge.release(bridged).await;
                }
                if self.participants[index].legs.is_empty() {
                    self.participants.remove(index);
                }
            }
            Command::Left { participant } => {
                let Some(index) = self.position(&participant) else {
                    debug!("Ignoring unknown participant {participant}");
                    return;
                };
                let participant = self.participants.remove(index);
                for (_, leg) in participant.legs {
                    if let Some(bridged) = leg.bridged {
                        bridge.release(bridged).await;
                    }
                }
            }
            Command::Shutdown => {
                self.closing = true;
                return;
            }
        }

        self.generation += 1;
        self.debounce = Some(Box::pin(sleep(self.debounce_period)));
        self.status.phase = Phase::Composing(self.generation);
        self.publish();
    }

    fn position(&self, id: &ParticipantId) -> Option<usize> {
        self.participants.iter().position(|p| &p.id == id)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.closing || self.generation != generation
    }

    fn supersede(&mut self, generation: u64) {
        info!(
            "Recomposition of generation {generation} superseded by generation {}",
            self.generation
        );
        self.status.superseded += 1;
        self.settle(Phase::Idle);
    }

    /// Publish `phase` unless another recomposition is already scheduled.
    fn settle(&mut self, phase: Phase) {
        self.status.phase = match self.debounce {
            Some(_) => Phase::Composing(self.generation),
            None => phase,
        };
        self.publish();
    }

    fn assign_layout(&mut self, canvas: Size) {
        let mut grid = Grid::default();
        grid.set_resolution_changed(canvas);
        grid.set_amount_of_visibles(self.participants.len());
        for (n, participant) in self.participants.iter_mut().enumerate() {
            participant.view = grid.calculate_stream_view(n);
        }
    }

    /// Published legs which are not bridged yet
    fn pending_legs(&self) -> Vec<(ParticipantId, MediaKind, String)> {
        self.participants
            .iter()
            .flat_map(|participant| {
                participant
                    .legs
                    .iter()
                    .filter(|(_, leg)| leg.bridged.is_none())
                    .map(|(kind, leg)| (participant.id.clone(), *kind, leg.producer_id.clone()))
            })
            .collect()
    }

    /// Store a freshly bridged leg, or release it if it is no longer wanted.
    async fn attach(&mut self, bridged: BridgedLeg, producer_id: &str, bridge: &MediaBridge) {
        let slot = self
            .participants
            .iter_mut()
            .find(|participant| &participant.id == bridged.participant())
            .and_then(|participant| participant.legs.get_mut(&bridged.kind()))
            .filter(|leg| leg.producer_id == producer_id && leg.bridged.is_none());

        match slot {
            Some(leg) => leg.bridged = Some(bridged),
            None => {
                debug!(
                    "{} of {} changed while bridging, releasing it",
                    bridged.kind(),
                    bridged.participant()
                );
                bridge.release(bridged).await;
            }
        }
    }

    fn inputs(&self) -> Vec<CompositionInput> {
        self.participants
            .iter()
            .filter(|participant| participant.legs.values().any(|leg| leg.bridged.is_some()))
            .map(|participant| {
                let descriptor = |kind| {
                    participant
                        .legs
                        .get(&kind)
                        .and_then(|leg| leg.bridged.as_ref())
                        .map(|bridged| bridged.descriptor().to_path_buf())
                };
                CompositionInput {
                    participant: participant.id.clone(),
                    view: participant.view.clone().unwrap_or_default(),
                    video: descriptor(MediaKind::Video),
                    audio: descriptor(MediaKind::Audio),
                }
            })
            .collect()
    }

    fn publish(&mut self) {
        self.status.generation = self.generation;
        self.status.participants = self.participants.iter().map(|p| p.id.clone()).collect();
        self.status_tx.send_replace(self.status.clone());
    }
}
