// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod websocket_server;

pub(crate) use websocket_server::start_websocket_server;

use std::sync::Once;

static INIT: Once = Once::new();

/// initialize logging for testing
pub(crate) fn init() {
    INIT.call_once(|| {
        env_logger::try_init().ok();
    });
}
