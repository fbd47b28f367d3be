//! Budget repository

use std::fmt;
use std::str::FromStr;

use chrono::{Days, Months, NaiveDate};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::SqlDate;
use crate::database::core::{DatabaseError, Result};

const BUDGET_COLUMNS: &str =
    "budget_id, user_id, category, amount, period, start_date, end_date, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Yearly => "yearly",
            BudgetPeriod::Custom => "custom",
        }
    }

    /// Last day of a period starting on `start`; `None` for custom periods
    pub fn last_day(&self, start: NaiveDate) -> Option<NaiveDate> {
        let next = match self {
            BudgetPeriod::Weekly => start.checked_add_days(Days::new(7)),
            BudgetPeriod::Monthly => start.checked_add_months(Months::new(1)),
            BudgetPeriod::Yearly => start.checked_add_months(Months::new(12)),
            BudgetPeriod::Custom => None,
        }?;
        next.pred_opt()
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(BudgetPeriod::Weekly),
            "monthly" => Ok(BudgetPeriod::Monthly),
            "yearly" => Ok(BudgetPeriod::Yearly),
            "custom" => Ok(BudgetPeriod::Custom),
            _ => Err(format!(
                "Unknown budget period '{}'. Valid periods: weekly, monthly, yearly, custom",
                s
            )),
        }
    }
}

impl ToSql for BudgetPeriod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BudgetPeriod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBudget {
    pub category: String,
    pub amount: f64,
    pub period: BudgetPeriod,
    pub start_date: NaiveDate,
    /// Overrides the end implied by `period`
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Budget {
    pub budget_id: i64,
    pub user_id: i64,
    pub category: String,
    pub amount: f64,
    pub period: BudgetPeriod,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub created_at: String,
}

impl Budget {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let start: SqlDate = row.get(5)?;
        let end: Option<SqlDate> = row.get(6)?;
        Ok(Budget {
            budget_id: row.get(0)?,
            user_id: row.get(1)?,
            category: row.get(2)?,
            amount: row.get(3)?,
            period: row.get(4)?,
            start_date: start.0,
            end_date: end.map(|d| d.0),
            created_at: row.get(7)?,
        })
    }

    /// Last day counted against this budget, `None` when open ended
    pub fn window_end(&self) -> Option<NaiveDate> {
        self.end_date.or_else(|| self.period.last_day(self.start_date))
    }
}

pub struct BudgetRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BudgetRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, user_id: i64, budget: &NewBudget) -> Result<Budget> {
        let sql = "INSERT INTO budgets (user_id, category, amount, period, start_date, end_date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
        let start = SqlDate(budget.start_date);
        let end = budget.end_date.map(SqlDate);
        self.conn
            .execute(
                sql,
                (
                    user_id,
                    &budget.category,
                    budget.amount,
                    budget.period,
                    start,
                    end,
                ),
            )
            .map_err(|e| {
                DatabaseError::sql(
                    sql,
                    &[&user_id, &budget.category, &budget.amount, &budget.period],
                    e,
                )
            })?;

        let budget_id = self.conn.last_insert_rowid();
        info!(
            "Budget created: {} {} {:.2}, ID: {}",
            budget.period, budget.category, budget.amount, budget_id
        );
        self.find_by_id(budget_id)?
            .ok_or_else(|| DatabaseError::sql(sql, &[], rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn find_by_id(&self, budget_id: i64) -> Result<Option<Budget>> {
        let sql = format!("SELECT {BUDGET_COLUMNS} FROM budgets WHERE budget_id = ?1");
        self.conn
            .query_row(&sql, [budget_id], Budget::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&budget_id], e))
    }

    pub fn list_for_user(&self, user_id: i64) -> Result<Vec<Budget>> {
        let sql = format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets WHERE user_id = ?1 \
             ORDER BY start_date DESC, category"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        let budgets = stmt
            .query_map([user_id], Budget::from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        Ok(budgets)
    }

    /// Expenses in the budget's category over its window
    pub fn spent(&self, budget: &Budget) -> Result<f64> {
        let sql = "SELECT COALESCE(SUM(amount), 0) FROM transactions \
             WHERE user_id = ?1 AND type = 'expense' AND category = ?2 \
             AND date >= ?3 AND (?4 IS NULL OR date <= ?4)";
        let start = SqlDate(budget.start_date);
        let end = budget.window_end().map(SqlDate);
        let params: [&dyn ToSql; 4] = [&budget.user_id, &budget.category, &start, &end];
        self.conn
            .query_row(sql, &params[..], |row| row.get(0))
            .map_err(|e| DatabaseError::sql(sql, &params, e))
    }

    pub fn delete(&self, budget_id: i64) -> Result<bool> {
        let sql = "DELETE FROM budgets WHERE budget_id = ?1";
        let deleted = self
            .conn
            .execute(sql, [budget_id])
            .map_err(|e| DatabaseError::sql(sql, &[&budget_id], e))?;
        Ok(deleted > 0)
    }
}
