//! Request handlers, one per navigation command.

use crate::navigation::Navigator;
use mpcomm::{Comm, EndpointAddress, Envelope};
use tracing::{debug, warn};

/// Everything a handler may touch.
pub struct ServerState {
    pub comm: Comm,
    pub navigator: Navigator,
}

/// Command names understood by the server.
pub mod commands {
    pub const CONNECT: &str = "connect";
    pub const GET_TOP_FILES: &str = "getTopFiles";
    pub const GET_TOP_DIRS: &str = "getTopDirs";
    pub const MOVE_INTO_FOLDER_FILES: &str = "moveIntoFolderFiles";
    pub const MOVE_INTO_FOLDER_DIRS: &str = "moveIntoFolderDirs";
    pub const GET_UP_FILES: &str = "getUpFiles";
    pub const GET_UP_DIRS: &str = "getUpDirs";
    pub const OPEN_FILE: &str = "OpenFile";
    pub const DEP_ANALYSIS: &str = "DepAnalysis";
    pub const CLOSE: &str = "Close";
}

/// Dispatch a request to the handler registered for its command.
pub async fn dispatch_command(state: &mut ServerState, request: &Envelope) -> Envelope {
    let reply = Envelope::reply(request);
    debug!("Dispatching '{}' from {}", request.command, request.from);

    match request.command.as_str() {
        commands::CONNECT => {
            state.navigator.reset();
            reply.with_argument("Connected")
        }
        commands::GET_TOP_FILES => {
            state.navigator.reset();
            reply.with_arguments(state.navigator.files())
        }
        commands::GET_TOP_DIRS => {
            state.navigator.reset();
            reply.with_arguments(state.navigator.dirs())
        }
        commands::MOVE_INTO_FOLDER_FILES => move_into_folder(state, request, reply),
        commands::MOVE_INTO_FOLDER_DIRS => reply.with_arguments(state.navigator.dirs()),
        commands::GET_UP_FILES => {
            state.navigator.up();
            reply.with_arguments(state.navigator.files())
        }
        commands::GET_UP_DIRS => reply.with_arguments(state.navigator.dirs()),
        commands::OPEN_FILE => open_file(state, request, reply).await,
        commands::DEP_ANALYSIS => {
            reply.with_error("dependency analysis is not available on this server")
        }
        commands::CLOSE => reply.with_argument("Close"),
        other => {
            warn!("Unknown command '{}' from {}", other, request.from);
            reply.with_error(format!("unknown command: {}", other))
        }
    }
}

fn move_into_folder(state: &mut ServerState, request: &Envelope, reply: Envelope) -> Envelope {
    match request.arguments.as_slice() {
        [folder] => match state.navigator.enter(folder) {
            Ok(_) => reply.with_arguments(state.navigator.files()),
            Err(e) => reply.with_error(e.to_string()),
        },
        _ => reply.with_error(format!(
            "{} expects one folder name, got {}",
            request.command,
            request.arguments.len()
        )),
    }
}

/// Upload the requested file from the current folder back to the requester.
async fn open_file(state: &mut ServerState, request: &Envelope, reply: Envelope) -> Envelope {
    let Some(file_name) = request.arguments.first() else {
        return reply
            .with_argument("")
            .with_error("OpenFile expects a file name");
    };

    let destination = match EndpointAddress::parse(&request.from) {
        Ok(destination) => destination,
        Err(e) => return reply.with_argument("").with_error(e.to_string()),
    };

    let folder = state.navigator.current().to_path_buf();
    if state
        .comm
        .post_file_to(&destination, &folder, file_name)
        .await
    {
        reply.with_argument(file_name.clone())
    } else {
        let reason = state.comm.sender().last_error().unwrap_or_default();
        reply.with_argument("").with_error(reason)
    }
}
