use {
    crate::progress::CancelFlag,
    anyhow::{Context, Result},
    derive_more::Display,
    std::future::Future,
    tokio::{signal::ctrl_c, task::JoinHandle},
    tracing::warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InterruptSignal {
    Sigint,
    Sigterm,
}

/// Waits for SIGINT or SIGTERM.
#[inline]
pub async fn interrupt_signal() -> Result<InterruptSignal> {
    let sigterm = sigterm().context("failed to install sigterm signal handler")?;
    tokio::select! {
        signal = ctrl_c() => {
            signal.context("failed to install sigint signal handler")?;
            Ok(InterruptSignal::Sigint)
        }
        () = sigterm => Ok(InterruptSignal::Sigterm),
    }
}

/// Raises `flag` when the process is interrupted.
///
/// The running command stops at its next block and removes its temporary files.
#[must_use]
#[inline]
pub fn cancel_on_interrupt(flag: CancelFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        match interrupt_signal().await {
            Ok(signal) => {
                warn!("received {signal}, cancelling");
                flag.raise();
            }
            Err(err) => warn!("{err:?}"),
        }
    })
}

fn sigterm() -> Result<impl Future<Output = ()>> {
    #[cfg(target_family = "unix")]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(async move {
            sigterm.recv().await;
        })
    }

    #[cfg(not(target_family = "unix"))]
    Ok(std::future::pending())
}
