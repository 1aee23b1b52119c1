//! The deadline node.
//!
//! Rank 1 holds no state: it sleeps for the configured deadline and sends
//! one `TIMEOUT` to the master. If the fleet ends first its link closes
//! and the timer dies quietly.

use crate::fleet::protocol::Message;
use crate::fleet::transport::Mailbox;
use crate::fleet::types::MASTER_RANK;

use anyhow::Result;
use std::time::Duration;

pub async fn run(mut mailbox: Mailbox, deadline_secs: u64) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(deadline_secs)) => {
            tracing::info!("global deadline of {}s elapsed", deadline_secs);
            let _ = mailbox.send(MASTER_RANK, Message::Timeout);
        }
        _ = mailbox.recv() => {
            tracing::debug!("fleet ended before the deadline");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::transport::local_fleet;
    use crate::fleet::types::Rank;

    #[tokio::test]
    async fn deadline_reports_timeout_to_master() {
        let mut boxes = local_fleet(3).into_iter();
        let mut master = boxes.next().unwrap();
        let timer_box = boxes.next().unwrap();
        let _worker = boxes.next().unwrap();

        tokio::spawn(run(timer_box, 0));
        let (from, msg) = master.recv().await.unwrap();
        assert_eq!(from, Rank(1));
        assert_eq!(msg, Message::Timeout);
    }

    #[tokio::test]
    async fn closed_fleet_ends_the_timer_early() {
        let mut boxes = local_fleet(3).into_iter();
        let master = boxes.next().unwrap();
        let timer_box = boxes.next().unwrap();
        let _worker = boxes.next().unwrap();

        let handle = tokio::spawn(run(timer_box, 3_600));
        drop(master);
        handle.await.unwrap().unwrap();
    }
}
