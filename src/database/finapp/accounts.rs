//! Account repository

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::core::{DatabaseError, Result};

const ACCOUNT_COLUMNS: &str =
    "account_id, user_id, name, type, balance, currency, created_at, updated_at";

/// Kind of account, stored as the labels shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Checking,
    Savings,
    #[serde(rename = "Credit Card")]
    CreditCard,
    Investment,
    Cash,
    Other,
}

impl AccountType {
    pub const ALL: [AccountType; 6] = [
        AccountType::Checking,
        AccountType::Savings,
        AccountType::CreditCard,
        AccountType::Investment,
        AccountType::Cash,
        AccountType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "Checking",
            AccountType::Savings => "Savings",
            AccountType::CreditCard => "Credit Card",
            AccountType::Investment => "Investment",
            AccountType::Cash => "Cash",
            AccountType::Other => "Other",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace(['-', '_'], " ");
        AccountType::ALL
            .into_iter()
            .find(|t| t.as_str().to_lowercase() == normalized)
            .ok_or_else(|| {
                format!(
                    "Unknown account type '{}'. Valid types: checking, savings, credit-card, investment, cash, other",
                    s
                )
            })
    }
}

impl ToSql for AccountType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AccountType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Fields supplied when opening an account
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub name: String,
    pub account_type: AccountType,
    pub balance: f64,
    pub currency: String,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            name: name.into(),
            account_type,
            balance: 0.0,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub account_id: i64,
    pub user_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub balance: f64,
    pub currency: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Account {
            account_id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            account_type: row.get(3)?,
            balance: row.get(4)?,
            currency: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

pub struct AccountRepository<'a> {
    conn: &'a Connection,
}

impl<'a> AccountRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, user_id: i64, account: &NewAccount) -> Result<Account> {
        let sql = "INSERT INTO accounts (user_id, name, type, balance, currency) \
             VALUES (?1, ?2, ?3, ?4, ?5)";
        self.conn
            .execute(
                sql,
                (
                    user_id,
                    &account.name,
                    account.account_type,
                    account.balance,
                    &account.currency,
                ),
            )
            .map_err(|e| {
                DatabaseError::sql(
                    sql,
                    &[
                        &user_id,
                        &account.name,
                        &account.account_type,
                        &account.balance,
                        &account.currency,
                    ],
                    e,
                )
            })?;

        let account_id = self.conn.last_insert_rowid();
        info!("Account created: {}, ID: {}", account.name, account_id);
        self.find_by_id(account_id)?
            .ok_or_else(|| DatabaseError::sql(sql, &[], rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn find_by_id(&self, account_id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?1");
        self.conn
            .query_row(&sql, [account_id], Account::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&account_id], e))
    }

    pub fn list_for_user(&self, user_id: i64) -> Result<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 ORDER BY name");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        let accounts = stmt
            .query_map([user_id], Account::from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        Ok(accounts)
    }

    /// Add `delta` (negative to subtract) to the balance of an account owned by `user_id`
    ///
    /// Returns `false` when the account does not exist or belongs to someone else.
    pub fn adjust_balance(&self, user_id: i64, account_id: i64, delta: f64) -> Result<bool> {
        let sql = "UPDATE accounts SET balance = balance + ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE account_id = ?2 AND user_id = ?3";
        let changed = self
            .conn
            .execute(sql, (delta, account_id, user_id))
            .map_err(|e| DatabaseError::sql(sql, &[&delta, &account_id, &user_id], e))?;
        Ok(changed > 0)
    }

    /// Delete an account and its transactions
    pub fn delete(&self, account_id: i64) -> Result<bool> {
        let sql = "DELETE FROM accounts WHERE account_id = ?1";
        let deleted = self
            .conn
            .execute(sql, [account_id])
            .map_err(|e| DatabaseError::sql(sql, &[&account_id], e))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::finapp::testing::{insert_user, setup_test_db};

    #[test]
    fn test_account_type_labels() {
        assert_eq!(AccountType::CreditCard.to_string(), "Credit Card");
        assert_eq!(
            "credit-card".parse::<AccountType>(),
            Ok(AccountType::CreditCard)
        );
        assert_eq!("SAVINGS".parse::<AccountType>(), Ok(AccountType::Savings));
        assert!("crypto".parse::<AccountType>().is_err());
    }

    #[test]
    fn test_create_list_adjust() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = AccountRepository::new(&db.conn);

        let mut wallet = NewAccount::new("Wallet", AccountType::Cash);
        wallet.balance = 20.0;
        let wallet = repo.create(user_id, &wallet).unwrap();
        let card = repo
            .create(user_id, &NewAccount::new("Card", AccountType::CreditCard))
            .unwrap();
        assert_eq!(card.account_type, AccountType::CreditCard);
        assert_eq!(card.currency, "USD");

        let names: Vec<_> = repo
            .list_for_user(user_id)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Card", "Wallet"]);

        assert!(repo.adjust_balance(user_id, wallet.account_id, -5.5).unwrap());
        let wallet = repo.find_by_id(wallet.account_id).unwrap().unwrap();
        assert!((wallet.balance - 14.5).abs() < f64::EPSILON);
        assert!(!repo.adjust_balance(user_id, 9999, 1.0).unwrap());

        let other = insert_user(&db, "b@example.com");
        assert!(!repo.adjust_balance(other, wallet.account_id, 100.0).unwrap());
        let wallet = repo.find_by_id(wallet.account_id).unwrap().unwrap();
        assert!((wallet.balance - 14.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delete() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = AccountRepository::new(&db.conn);
        let account = repo
            .create(user_id, &NewAccount::new("Savings", AccountType::Savings))
            .unwrap();

        assert!(repo.delete(account.account_id).unwrap());
        assert!(repo.list_for_user(user_id).unwrap().is_empty());
    }
}
