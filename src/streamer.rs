// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use compositor::{
    CompositorSupervisor, MediaBridge, OrchestratorHandle, PortAllocator, StreamOrchestrator,
};
use std::sync::Arc;
use tokio::{
    select,
    sync::{mpsc, watch::Receiver},
    task::JoinHandle,
};

use crate::{
    settings::Settings,
    sfu::RemoteRouter,
    signaling::{outgoing, Event, Signaling},
};

/// Run one streaming session on a fresh signaling connection.
///
/// Returns after shutdown was requested or the connection was closed, in both cases after
/// the composition has been torn down.
pub async fn run(settings: &Settings, mut shutdown_rx: Receiver<bool>) -> Result<()> {
    let mut signaling = Signaling::connect(&settings.signaling).await?;

    let (requests_tx, mut requests_rx) = mpsc::channel(64);
    let router = RemoteRouter::new(requests_tx, settings.signaling.request_timeout());

    let bridge = MediaBridge::new(
        Arc::new(router.clone()),
        PortAllocator::new((&settings.ports).into()),
        (&settings.bridge).into(),
    );
    let supervisor = CompositorSupervisor::new((&settings.transcoder).into());
    let (orchestrator, handle) =
        StreamOrchestrator::new(bridge, supervisor, settings.orchestrator_parameters());
    let mut orchestrator_task = tokio::spawn(orchestrator.run());

    let result = serve(
        &mut signaling,
        &mut shutdown_rx,
        &mut requests_rx,
        &router,
        &handle,
    )
    .await;

    let connected = matches!(result, Ok(true));
    if let Err(e) = &result {
        log::error!("Streaming session failed: {e:#}");
    }
    if !connected {
        router.fail_pending("signaling connection closed");
    }

    // the teardown still talks to the media server
    if let Err(e) = handle.shutdown().await {
        log::debug!("{e}");
    }
    finish(
        &mut orchestrator_task,
        &mut signaling,
        &mut requests_rx,
        &router,
        connected,
    )
    .await;

    result.map(|_| ())
}

/// Serve the signaling connection until shutdown, returns false if the connection was closed.
async fn serve(
    signaling: &mut Signaling,
    shutdown_rx: &mut Receiver<bool>,
    requests_rx: &mut mpsc::Receiver<outgoing::BridgeRequest>,
    router: &RemoteRouter,
    handle: &OrchestratorHandle,
) -> Result<bool> {
    loop {
        select! {
            result = shutdown_rx.changed() => {
                result?;
                if *shutdown_rx.borrow() {
                    log::info!("Shutting down streaming session");
                    return Ok(true);
                }
            }
            Some(request) = requests_rx.recv() => {
                signaling.send(outgoing::Message::Bridge(request)).await?;
            }
            event = signaling.run() => {
                if !dispatch(event?, router, handle).await? {
                    return Ok(false);
                }
            }
        }
    }
}

/// Forward an event, returns false once the connection is closed.
async fn dispatch(event: Event, router: &RemoteRouter, handle: &OrchestratorHandle) -> Result<bool> {
    match event {
        Event::Command(command) => {
            log::debug!("signaling: {command:?}");
            handle
                .send(command)
                .await
                .context("orchestrator stopped unexpectedly")?;
        }
        Event::BridgeResponse(response) => router.resolve(response),
        Event::TapClosed(tap_id) => router.tap_closed(&tap_id),
        Event::Close => {
            log::info!("Media server closed the signaling connection");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Serve the bridge requests of the teardown until the orchestrator is done.
async fn finish(
    orchestrator_task: &mut JoinHandle<()>,
    signaling: &mut Signaling,
    requests_rx: &mut mpsc::Receiver<outgoing::BridgeRequest>,
    router: &RemoteRouter,
    mut connected: bool,
) {
    loop {
        select! {
            result = &mut *orchestrator_task => {
                if let Err(e) = result {
                    log::error!("Orchestrator failed: {e}");
                }
                return;
            }
            Some(request) = requests_rx.recv() => {
                if !connected {
                    router.fail_pending("signaling connection closed");
                    continue;
                }
                if let Err(e) = signaling.send(outgoing::Message::Bridge(request)).await {
                    log::warn!("Unable to send bridge request: {e:#}");
                    connected = false;
                    router.fail_pending("signaling connection closed");
                }
            }
            event = signaling.run(), if connected => match event {
                Ok(Event::BridgeResponse(response)) => router.resolve(response),
                Ok(Event::Close) | Err(_) => {
                    connected = false;
                    router.fail_pending("signaling connection closed");
                }
                Ok(_) => {}
            },
        }
    }
}
