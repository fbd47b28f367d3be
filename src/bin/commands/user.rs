use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use finapp::database::UserRepository;
use finapp::{AuthService, FinappConfig, OutputFormat};

use super::{find_user, open_database, print_value};

#[derive(Args)]
pub struct UserArgs {
    #[clap(subcommand)]
    pub command: UserCommands,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Register {
        /// Full name shown in the app
        #[clap(long)]
        name: String,

        #[clap(long)]
        email: String,

        /// At least 8 characters
        #[clap(long)]
        password: String,
    },

    /// Check a user's credentials
    Login {
        #[clap(long)]
        email: String,

        #[clap(long)]
        password: String,
    },

    /// Change a user's password
    Passwd {
        #[clap(long)]
        email: String,

        /// Current password
        #[clap(long)]
        current: String,

        /// New password
        #[clap(long)]
        new: String,
    },

    /// Delete a user and everything they own
    Remove {
        #[clap(long)]
        email: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

pub async fn run(config: &FinappConfig, args: UserArgs, output_format: OutputFormat) -> Result<()> {
    let (_coordinator, db) = open_database(config).await?;
    let auth = AuthService::new(db.clone());

    match args.command {
        UserCommands::Register {
            name,
            email,
            password,
        } => {
            let user = auth.register(&name, &email, &password)?;
            print_value(&user, output_format, |user| {
                println!("Registered {} <{}> with ID {}", user.full_name, user.email, user.user_id);
            })
        }
        UserCommands::Login { email, password } => {
            let user = auth.login(&email, &password)?;
            print_value(&user, output_format, |user| {
                println!("Credentials valid for {} (ID {})", user.email, user.user_id);
            })
        }
        UserCommands::Passwd {
            email,
            current,
            new,
        } => {
            let user = find_user(&db, &email)?;
            auth.change_password(user.user_id, &current, &new)?;
            print_value(&user, output_format, |user| {
                println!("Password changed for {}", user.email);
            })
        }
        UserCommands::Remove { email, yes } => {
            if !yes {
                return Err(anyhow!(
                    "Removing {} deletes all of their data. Re-run with --yes to confirm",
                    email
                ));
            }
            let user = find_user(&db, &email)?;
            db.with_conn(|conn| UserRepository::new(conn).delete(user.user_id))?;
            print_value(&user, output_format, |user| {
                println!("Removed {} (ID {})", user.email, user.user_id);
            })
        }
    }
}
