//! Transaction repository
//!
//! Recording a transaction also moves the balance of its account, inside one
//! SQLite transaction.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AccountRepository, SqlDate};
use crate::database::core::{DatabaseError, Result};

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, user_id, description, amount, \
     type, category, date, created_at";

/// Label used for transactions without a category
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }

    /// Balance change caused by a transaction of this type
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            TransactionType::Income => amount,
            TransactionType::Expense => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            _ => Err(format!(
                "Unknown transaction type '{}'. Valid types: income, expense",
                s
            )),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: i64,
    pub description: Option<String>,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub category: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: i64,
    pub account_id: i64,
    pub user_id: i64,
    pub description: Option<String>,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub category: Option<String>,
    pub date: NaiveDate,
    pub created_at: String,
}

impl Transaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let date: SqlDate = row.get(7)?;
        Ok(Transaction {
            transaction_id: row.get(0)?,
            account_id: row.get(1)?,
            user_id: row.get(2)?,
            description: row.get(3)?,
            amount: row.get(4)?,
            transaction_type: row.get(5)?,
            category: row.get(6)?,
            date: date.0,
            created_at: row.get(8)?,
        })
    }
}

/// Sum of transactions in one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
    pub count: u64,
}

pub struct TransactionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a transaction and apply it to the account balance
    pub fn record(&self, user_id: i64, new: &NewTransaction) -> Result<Transaction> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DatabaseError::sql("BEGIN", &[], e))?;

        let sql = "INSERT INTO transactions \
             (account_id, user_id, description, amount, type, category, date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        let date = SqlDate(new.date);
        tx.execute(
            sql,
            (
                new.account_id,
                user_id,
                &new.description,
                new.amount,
                new.transaction_type,
                &new.category,
                date,
            ),
        )
        .map_err(|e| {
            DatabaseError::sql(
                sql,
                &[
                    &new.account_id,
                    &user_id,
                    &new.description,
                    &new.amount,
                    &new.transaction_type,
                    &new.category,
                    &date,
                ],
                e,
            )
        })?;
        let transaction_id = tx.last_insert_rowid();

        let delta = new.transaction_type.signed(new.amount);
        if !AccountRepository::new(&tx).adjust_balance(user_id, new.account_id, delta)? {
            // Dropping `tx` rolls the insert back
            return Err(DatabaseError::NotFound(format!(
                "account {} of user {}",
                new.account_id, user_id
            )));
        }

        tx.commit()
            .map_err(|e| DatabaseError::sql("COMMIT", &[], e))?;
        info!(
            "Recorded {} of {:.2} on account {}",
            new.transaction_type, new.amount, new.account_id
        );

        self.find_by_id(transaction_id)?
            .ok_or_else(|| DatabaseError::sql(sql, &[], rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn find_by_id(&self, transaction_id: i64) -> Result<Option<Transaction>> {
        let sql =
            format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = ?1");
        self.conn
            .query_row(&sql, [transaction_id], Transaction::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&transaction_id], e))
    }

    /// Newest first
    pub fn list_for_account(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?1 \
             ORDER BY date DESC, transaction_id DESC"
        );
        self.query_list(&sql, &[&account_id])
    }

    /// Transactions dated within `[start, end]`, newest first
    pub fn list_for_user_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = ?1 AND date >= ?2 AND date <= ?3 \
             ORDER BY date DESC, transaction_id DESC"
        );
        self.query_list(&sql, &[&user_id, &SqlDate(start), &SqlDate(end)])
    }

    /// Per-category totals of one transaction type within `[start, end]`,
    /// largest first
    pub fn total_by_category(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CategoryTotal>> {
        let sql = "SELECT COALESCE(category, ?5) AS cat, SUM(amount), COUNT(*) FROM transactions \
             WHERE user_id = ?1 AND type = ?2 AND date >= ?3 AND date <= ?4 \
             GROUP BY cat ORDER BY SUM(amount) DESC, cat";
        let params: [&dyn ToSql; 5] = [
            &user_id,
            &transaction_type,
            &SqlDate(start),
            &SqlDate(end),
            &UNCATEGORIZED,
        ];
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DatabaseError::sql(sql, &params, e))?;
        let totals = stmt
            .query_map(&params[..], |row| {
                Ok(CategoryTotal {
                    category: row.get(0)?,
                    total: row.get(1)?,
                    count: row.get(2)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(sql, &params, e))?;
        debug!("{} categories for user {}", totals.len(), user_id);
        Ok(totals)
    }

    fn query_list(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Transaction>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DatabaseError::sql(sql, params, e))?;
        let rows = stmt
            .query_map(params, Transaction::from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(sql, params, e))?;
        Ok(rows)
    }
}
