/// Side effects run when the state machine enters a state.
///
/// Each action reports back by dispatching the next event; none of them
/// touch the state machine directly.
mod fork;
mod initialize;
mod lifecycle;
mod sync;

use crate::service::Blockchain;
use crate::states::Action;
use anyhow::Result;

pub use fork::start_fork_recovery;
pub use initialize::initialize;
pub use lifecycle::{blockchain_ready, check_later, exit_app};
pub use sync::{
    check_last_block_synced, check_last_downloaded_block_synced, download_blocks, download_finished,
    syncing_complete,
};

pub async fn run(blockchain: &Blockchain, action: Action) -> Result<()> {
    match action {
        Action::Initialize => initialize(blockchain).await,
        Action::CheckLater => {
            check_later(blockchain);
            Ok(())
        }
        Action::BlockchainReady => {
            blockchain_ready(blockchain);
            Ok(())
        }
        Action::CheckLastDownloadedBlockSynced => check_last_downloaded_block_synced(blockchain).await,
        Action::DownloadBlocks => download_blocks(blockchain).await,
        Action::DownloadFinished => {
            download_finished(blockchain);
            Ok(())
        }
        Action::DownloadPaused => {
            tracing::info!("Blockchain download paused");
            Ok(())
        }
        Action::CheckLastBlockSynced => {
            check_last_block_synced(blockchain);
            Ok(())
        }
        Action::SyncingComplete => {
            syncing_complete(blockchain);
            Ok(())
        }
        Action::StartForkRecovery => start_fork_recovery(blockchain).await,
        Action::Stopped => {
            tracing::info!("The blockchain has been stopped");
            Ok(())
        }
        Action::ExitApp => {
            exit_app(blockchain);
            Ok(())
        }
    }
}
