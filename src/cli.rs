use clap::{Parser, Subcommand};

/// notifyd: push notification fan-out service
#[derive(Parser)]
#[command(name = "notifyd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to NOTIFYD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run database migrations and exit
    Migrate,

    /// Create and inspect broadcast notifications
    Broadcast {
        #[command(subcommand)]
        command: BroadcastCommands,
    },

    /// Resolve coordinates to a city with the configured geocoder
    Geocode {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
}

#[derive(Subcommand)]
pub enum BroadcastCommands {
    /// Create a broadcast and send it immediately
    Send {
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        event_name: Option<String>,
        #[arg(long)]
        event_city: Option<String>,
        #[arg(long, default_value = "cli")]
        created_by: String,
    },
    /// Show the delivery status of a broadcast
    Status { id: String },
}
