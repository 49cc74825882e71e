use clap::{Parser, Subcommand};

/// Herald — real-time notification fan-out for collaborative task boards
#[derive(Parser)]
#[command(name = "herald", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage session tokens
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Mint a bearer session token for a user
    Create {
        #[arg(long)]
        user_id: String,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// Create a workspace owned by a user
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner_id: String,
    },
    /// Add a member to a workspace
    AddMember {
        #[arg(long)]
        workspace_id: String,
        #[arg(long)]
        user_id: String,
    },
}
