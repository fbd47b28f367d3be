use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Subcommand};
use finapp::database::{NewTodo, Reminder, Todo, TodoRepository};
use finapp::output::{truncate_text, DEFAULT_TEXT_MAX_LEN};
use finapp::{FinappConfig, OutputFormat};
use serde::Serialize;
use tabled::Tabled;

use super::{display_opt, find_user, open_database, print_rows, print_value};

#[derive(Args)]
pub struct TodoArgs {
    /// Email of the user owning the list
    #[clap(long, short)]
    pub user: String,

    #[clap(subcommand)]
    pub command: TodoCommands,
}

#[derive(Subcommand)]
pub enum TodoCommands {
    /// Add a todo item
    Add {
        title: String,

        #[clap(long, short)]
        description: Option<String>,

        /// Reminder date, YYYY-MM-DD
        #[clap(long, requires = "remind_time")]
        remind_date: Option<NaiveDate>,

        /// Reminder time, HH:MM
        #[clap(long, requires = "remind_date", value_parser = parse_time)]
        remind_time: Option<NaiveTime>,
    },

    /// List todo items, open ones first
    List,

    /// Mark a todo item as done
    Done {
        id: i64,

        /// Mark as not done instead
        #[clap(long)]
        undo: bool,
    },

    /// Remove a todo item
    Remove { id: i64 },
}

#[derive(Tabled, Serialize)]
struct TodoRow {
    id: i64,
    done: String,
    title: String,
    description: String,
    reminder: String,
}

impl From<&Todo> for TodoRow {
    fn from(todo: &Todo) -> Self {
        TodoRow {
            id: todo.todo_id,
            done: if todo.completed { "x" } else { "" }.to_string(),
            title: truncate_text(&todo.title, DEFAULT_TEXT_MAX_LEN),
            description: truncate_text(&display_opt(&todo.description), DEFAULT_TEXT_MAX_LEN),
            reminder: match &todo.reminder {
                Some(r) => format!("{} {}", r.date, r.time.format("%H:%M")),
                None => "-".to_string(),
            },
        }
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

pub async fn run(config: &FinappConfig, args: TodoArgs, output_format: OutputFormat) -> Result<()> {
    let (_coordinator, db) = open_database(config).await?;
    let user = find_user(&db, &args.user)?;

    match args.command {
        TodoCommands::Add {
            title,
            description,
            remind_date,
            remind_time,
        } => {
            let reminder = match (remind_date, remind_time) {
                (Some(date), Some(time)) => Some(Reminder { date, time }),
                _ => None,
            };
            let new = NewTodo {
                title,
                description,
                reminder,
                completed: false,
            };
            let todo = db.with_conn(|conn| TodoRepository::new(conn).create(user.user_id, &new))?;
            print_value(&todo, output_format, |todo| {
                println!("Added todo {}: {}", todo.todo_id, todo.title);
            })
        }
        TodoCommands::List => {
            let todos = db.with_conn(|conn| TodoRepository::new(conn).list_for_user(user.user_id))?;
            if output_format.is_json() {
                println!("{}", output_format.to_json(&todos)?);
                return Ok(());
            }
            let rows: Vec<TodoRow> = todos.iter().map(TodoRow::from).collect();
            print_rows(&rows, output_format)
        }
        TodoCommands::Done { id, undo } => {
            let todo = owned_todo(&db, user.user_id, id)?;
            db.with_conn(|conn| TodoRepository::new(conn).set_completed(todo.todo_id, !undo))?;
            print_value(&todo, output_format, |todo| {
                let state = if undo { "open" } else { "done" };
                println!("Marked todo {} as {}", todo.todo_id, state);
            })
        }
        TodoCommands::Remove { id } => {
            let todo = owned_todo(&db, user.user_id, id)?;
            db.with_conn(|conn| TodoRepository::new(conn).delete(todo.todo_id))?;
            print_value(&todo, output_format, |todo| {
                println!("Removed todo {}: {}", todo.todo_id, todo.title);
            })
        }
    }
}

fn owned_todo(db: &finapp::DbHandle, user_id: i64, todo_id: i64) -> Result<Todo> {
    db.with_conn(|conn| TodoRepository::new(conn).find_by_id(todo_id))?
        .filter(|todo| todo.user_id == user_id)
        .ok_or_else(|| anyhow!("No todo with ID {} for this user", todo_id))
}
