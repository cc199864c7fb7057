use super::LeadStore;
use crate::{
    error::LeadResult,
    ledger::{
        Account, AccountId, AccountOwner, LedgerTransaction, Operation, OperationId,
        OperationStatus, OperationType,
    },
    types::{Minor, RecordId},
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const OPERATION_COLUMNS: &str =
    "id, based_on_type, based_on_id, type, status, account_from, account_to, created_at";

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    Ok(Operation {
        id: row.get(0)?,
        based_on_type: row.get(1)?,
        based_on_id: row.get(2)?,
        op_type: row.get(3)?,
        status: row.get(4)?,
        account_from: row.get(5)?,
        account_to: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl LeadStore {
    // ── Accounts ───────────────────────────────────────────────

    /// Insert-or-fetch on the unique (owner, network, currency) key, so two
    /// writers racing on a new tuple end up with the same account.
    pub fn find_or_create_account(
        &self,
        owner: AccountOwner,
        network_id: RecordId,
        currency: &str,
    ) -> LeadResult<AccountId> {
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO network_account (owner_type, owner_id, network_id, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![owner.owner_type(), owner.owner_id(), network_id, currency, Utc::now()],
        )?;
        if created == 1 {
            log::debug!(
                "Created {} account owner={} network={network_id} currency={currency}",
                owner.owner_type().as_str(),
                owner.owner_id()
            );
        }
        let id = self.conn.query_row(
            "SELECT id FROM network_account
             WHERE owner_type = ?1 AND owner_id = ?2 AND network_id = ?3 AND currency = ?4",
            params![owner.owner_type(), owner.owner_id(), network_id, currency],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_account(
        &self,
        owner: AccountOwner,
        network_id: RecordId,
        currency: &str,
    ) -> LeadResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                "SELECT id, owner_type, owner_id, network_id, currency FROM network_account
                 WHERE owner_type = ?1 AND owner_id = ?2 AND network_id = ?3 AND currency = ?4",
                params![owner.owner_type(), owner.owner_id(), network_id, currency],
                |row| {
                    Ok(Account {
                        id: row.get(0)?,
                        owner_type: row.get(1)?,
                        owner_id: row.get(2)?,
                        network_id: row.get(3)?,
                        currency: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    pub fn account_count(&self) -> LeadResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM network_account", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Incoming minus outgoing, in the account's own currency.
    pub fn account_balance(&self, account_id: AccountId) -> LeadResult<Minor> {
        let balance = self.conn.query_row(
            "SELECT
                COALESCE((SELECT SUM(t.sum) FROM transactions t
                          WHERE t.account_to = a.id AND t.currency = a.currency), 0)
              - COALESCE((SELECT SUM(t.sum) FROM transactions t
                          WHERE t.account_from = a.id AND t.currency = a.currency), 0)
             FROM network_account a WHERE a.id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// (incoming, outgoing) transaction counts for an account.
    pub fn account_transaction_counts(&self, account_id: AccountId) -> LeadResult<(i64, i64)> {
        let counts = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM transactions WHERE account_to = ?1),
                (SELECT COUNT(*) FROM transactions WHERE account_from = ?1)",
            params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    // ── Operations ─────────────────────────────────────────────

    pub fn insert_operation(
        &self,
        based_on_type: &str,
        based_on_id: i64,
        op_type: OperationType,
    ) -> LeadResult<OperationId> {
        self.conn.execute(
            "INSERT INTO operation (based_on_type, based_on_id, type, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![based_on_type, based_on_id, op_type, OperationStatus::New, Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_operation_processed(
        &self,
        operation_id: OperationId,
        account_from: AccountId,
        account_to: AccountId,
    ) -> LeadResult<()> {
        self.conn.execute(
            "UPDATE operation SET status = ?2, account_from = ?3, account_to = ?4 WHERE id = ?1",
            params![operation_id, OperationStatus::Processed, account_from, account_to],
        )?;
        Ok(())
    }

    /// Latest operation for a source record, by insertion order.
    pub fn last_operation(&self, based_on_type: &str, based_on_id: i64) -> LeadResult<Option<Operation>> {
        let op = self
            .conn
            .query_row(
                &format!(
                    "SELECT {OPERATION_COLUMNS} FROM operation
                     WHERE based_on_type = ?1 AND based_on_id = ?2
                     ORDER BY id DESC LIMIT 1"
                ),
                params![based_on_type, based_on_id],
                operation_from_row,
            )
            .optional()?;
        Ok(op)
    }

    pub fn operations_for(&self, based_on_type: &str, based_on_id: i64) -> LeadResult<Vec<Operation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM operation
             WHERE based_on_type = ?1 AND based_on_id = ?2
             ORDER BY id ASC"
        ))?;
        let ops = stmt
            .query_map(params![based_on_type, based_on_id], operation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    // ── Transactions ───────────────────────────────────────────

    pub fn insert_transaction(
        &self,
        operation_id: OperationId,
        account_from: AccountId,
        account_to: AccountId,
        sum: Minor,
        currency: &str,
    ) -> LeadResult<()> {
        self.conn.execute(
            "INSERT INTO transactions (operation_id, account_from, account_to, sum, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![operation_id, account_from, account_to, sum, currency, Utc::now()],
        )?;
        Ok(())
    }

    pub fn operation_transactions(&self, operation_id: OperationId) -> LeadResult<Vec<LedgerTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.operation_id, t.account_from, t.account_to,
                    af.owner_type, at.owner_type, t.sum, t.currency
             FROM transactions t
             JOIN network_account af ON af.id = t.account_from
             JOIN network_account at ON at.id = t.account_to
             WHERE t.operation_id = ?1
             ORDER BY t.id ASC",
        )?;
        let rows = stmt
            .query_map(params![operation_id], |row| {
                Ok(LedgerTransaction {
                    id: row.get(0)?,
                    operation_id: row.get(1)?,
                    account_from: row.get(2)?,
                    account_to: row.get(3)?,
                    from_owner: row.get(4)?,
                    to_owner: row.get(5)?,
                    sum: row.get(6)?,
                    currency: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
