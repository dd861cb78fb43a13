//! The controller that owns the shared pieces and runs the bridge.
//!
//! Two queues, two PTT flags, one endpoint per network. The controller
//! spawns each endpoint's task set and waits for either a ctrl-c or a
//! programmatic [`BridgeController::shutdown`], then signals every task to
//! wind down and drains them.

use std::io::Error as IoError;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::internal::prelude::*;
use crate::queue::{ByteQueue, PttFlag};
use crate::usrp::UsrpEndpoint;
use crate::zello::ZelloSession;

pub struct BridgeController {
    usrp: Option<UsrpEndpoint>,
    zello: Option<ZelloSession>,
    shutdown: watch::Sender<bool>,
}

impl BridgeController {
    /// Builds the queues, flags and endpoints. Fails fast if the USRP
    /// sockets cannot be set up.
    pub async fn new(config: Config) -> Result<Self> {
        // Audio from USRP ingress toward the Zello egress task, and the
        // reverse. Named from the audio's point of view.
        let usrp_to_zello = Arc::new(ByteQueue::new());
        let zello_to_usrp = Arc::new(ByteQueue::new());

        let usrp_ptt = Arc::new(PttFlag::new());
        let zello_ptt = Arc::new(PttFlag::new());

        let usrp = UsrpEndpoint::bind(
            &config.usrp,
            Arc::clone(&usrp_to_zello),
            Arc::clone(&zello_to_usrp),
            Arc::clone(&usrp_ptt),
        )
        .await?;

        let zello = ZelloSession::new(
            config.zello,
            config.opus_complexity,
            config.opus_bitrate,
            usrp_to_zello,
            zello_to_usrp,
            usrp_ptt,
            zello_ptt,
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            usrp: Some(usrp),
            zello: Some(zello),
            shutdown,
        })
    }

    /// Runs the bridge until shutdown. One-shot.
    pub async fn run(&mut self) -> Result<()> {
        let usrp = self.usrp.take().expect("BridgeController::run is one-shot");
        let zello = self.zello.take().expect("BridgeController::run is one-shot");

        let usrp_task = tokio::spawn(usrp.run(self.shutdown.subscribe()));
        let zello_task = tokio::spawn(zello.run(self.shutdown.subscribe()));

        let mut observer = self.shutdown.subscribe();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown requested");
            },
            _ = observer.wait_for(|stop| *stop) => {},
        }

        let _ = self.shutdown.send(true);

        let (usrp_result, zello_result) = tokio::join!(usrp_task, zello_task);
        usrp_result.map_err(IoError::other)?;
        zello_result.map_err(IoError::other)?;

        info!("Bridge stopped");
        Ok(())
    }

    /// Signals every task to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
