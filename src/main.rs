// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

#![allow(clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use log::warn;
use opentalk_hls_streamer::{settings::Settings, streamer};
use tokio::{
    select,
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
    sync::watch::{self, Receiver},
    time::{sleep, Duration},
};

const RECONNECT_INTERVAL: Duration = Duration::from_millis(3_000); //ms

fn check_for_ffmpeg(program: &str) -> Result<()> {
    _ = std::process::Command::new(program)
        .args(["-version"])
        .output()?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = Settings::load("config.toml").context("Failed to read config")?;

    if check_for_ffmpeg(&settings.transcoder.program).is_err() {
        warn!(
            "{} is not present on the system. Streaming will not work.",
            settings.transcoder.program
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio async runtime")?;

    runtime.spawn(async move {
        let mut sig_term = match signal(SignalKind::terminate()) {
            Ok(sig_term) => sig_term,
            Err(e) => {
                log::error!("can not setup SIGTERM handler: {e}");
                return;
            }
        };
        select! {
            _ = ctrl_c() => { log::info!("received Ctrl-C"); }
            _ = sig_term.recv() => { log::info!("received SIGTERM"); }
        }
        if shutdown_tx.send(true).is_err() {
            log::error!("failed to send shutdown signal");
        }
    });

    if let Err(e) = runtime.block_on(main2(settings, shutdown_rx)) {
        eprintln!("Exit on failure: {e:?}");
        std::process::exit(-1);
    }

    Ok(())
}

async fn main2(settings: Settings, mut shutdown_rx: Receiver<bool>) -> Result<()> {
    while !*shutdown_rx.borrow() {
        if let Err(e) = streamer::run(&settings, shutdown_rx.clone()).await {
            log::error!(
                "Streaming session ended: {:?} (reconnecting in {:?})",
                e,
                RECONNECT_INTERVAL
            );
        }
        if *shutdown_rx.borrow() {
            break;
        }
        select! {
            result = shutdown_rx.changed() => {
                result?;
            }
            _ = sleep(RECONNECT_INTERVAL) => {}
        }
    }

    Ok(())
}
