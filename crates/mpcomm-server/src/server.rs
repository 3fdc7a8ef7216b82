//! Message loop of the navigation server.

use crate::handlers::{commands, dispatch_command, ServerState};
use mpcomm::{CommError, MessageType};
use tracing::{debug, info};

/// Serve requests until a `closeReceiver` envelope or a `Close` command.
pub async fn run(state: &mut ServerState) -> anyhow::Result<()> {
    info!("Navigation server listening on {}", state.comm.endpoint());

    loop {
        let request = match state.comm.get_message().await {
            Ok(request) => request,
            Err(CommError::ReceiverClosed) => break,
            Err(e) => return Err(e.into()),
        };

        if request.message_type == MessageType::CloseReceiver {
            info!("closeReceiver from {}, shutting down", request.from);
            break;
        }
        debug!("{}", request);
        if request.command.is_empty() {
            continue;
        }

        let reply = dispatch_command(state, &request).await;
        debug!("{}", reply);
        state.comm.post_message(reply);

        if request.command == commands::CLOSE {
            info!("Close requested by {}", request.from);
            break;
        }
    }

    state.comm.close().await;
    Ok(())
}
