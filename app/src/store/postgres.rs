// app/src/store/postgres.rs

//! PostgreSQL backend. Runtime (non-macro) queries; every conditional write is
//! one statement whose `WHERE` clause carries the precondition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
  CartStore, CatalogStore, ClaimOutcome, LedgerStore, OrderStore, PromoStore, SubscriptionStore, WalletStore,
};
use crate::errors::Result;
use crate::models::{
  CartLine, DeliveryStatus, LedgerEntry, LedgerStatus, LineItem, NewLedgerEntry, NewOrder, Order, OrderLine,
  PaidUpdate, PaymentMethod, PaymentStatus, PaymentSync, Product, PromoCode, RefundResolution, RefundStatus,
  Subscription, WalletEntry,
};

const ORDER_COLUMNS: &str = "id, account_id, subtotal_cents, delivery_fee_cents, benefit_discount_cents, promo_code, \
  promo_discount_cents, total_amount_cents, currency, payment_method, payment_status, payment_reference, payer_email, \
  paid_at, delivery_type, scheduled_at, eta_window_start, eta_window_end, delivery_status, refund_status, \
  refund_reason, refund_requested_at, refund_reviewed_at, refunded_amount_cents, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, order_id, payer_id, payer_email, amount_cents, currency, status, payment_method, \
  payment_reference, capture_id, refund_id, refund_note, created_at";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPool::connect(database_url).await?;
    Ok(Self::new(pool))
  }

  pub async fn migrate(&self) -> Result<()> {
    sqlx::migrate!("./migrations")
      .run(&self.pool)
      .await
      .map_err(|e| crate::errors::AppError::Internal(format!("Migration failed: {}", e)))?;
    Ok(())
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

#[async_trait]
impl CatalogStore for PgStore {
  async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
      "SELECT id, name, description, price_cents, stock_quantity, created_at, updated_at FROM products WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(product)
  }

  async fn insert_product(&self, product: Product) -> Result<()> {
    sqlx::query(
      "INSERT INTO products (id, name, description, price_cents, stock_quantity, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
    )
    .bind(product.id)
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price_cents)
    .bind(product.stock_quantity)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<Option<i32>> {
    let level: Option<i32> = sqlx::query_scalar(
      "UPDATE products SET stock_quantity = stock_quantity + $1, updated_at = NOW() \
       WHERE id = $2 AND stock_quantity + $1 >= 0 RETURNING stock_quantity",
    )
    .bind(delta)
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(level)
  }
}

#[async_trait]
impl CartStore for PgStore {
  async fn lines(&self, account_id: Uuid) -> Result<Vec<CartLine>> {
    let lines = sqlx::query_as::<_, CartLine>(
      "SELECT account_id, product_id, product_name, unit_price_cents, quantity, added_at \
       FROM cart_items WHERE account_id = $1 ORDER BY added_at",
    )
    .bind(account_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(lines)
  }

  async fn line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>> {
    let line = sqlx::query_as::<_, CartLine>(
      "SELECT account_id, product_id, product_name, unit_price_cents, quantity, added_at \
       FROM cart_items WHERE account_id = $1 AND product_id = $2",
    )
    .bind(account_id)
    .bind(product_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(line)
  }

  async fn add_line(&self, line: CartLine) -> Result<CartLine> {
    let line = sqlx::query_as::<_, CartLine>(
      "INSERT INTO cart_items (account_id, product_id, product_name, unit_price_cents, quantity, added_at) \
       VALUES ($1, $2, $3, $4, $5, $6) \
       ON CONFLICT (account_id, product_id) DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity \
       RETURNING account_id, product_id, product_name, unit_price_cents, quantity, added_at",
    )
    .bind(line.account_id)
    .bind(line.product_id)
    .bind(&line.product_name)
    .bind(line.unit_price_cents)
    .bind(line.quantity)
    .bind(line.added_at)
    .fetch_one(&self.pool)
    .await?;
    Ok(line)
  }

  async fn set_quantity(&self, account_id: Uuid, product_id: Uuid, quantity: i32) -> Result<Option<CartLine>> {
    let line = sqlx::query_as::<_, CartLine>(
      "UPDATE cart_items SET quantity = $3 WHERE account_id = $1 AND product_id = $2 \
       RETURNING account_id, product_id, product_name, unit_price_cents, quantity, added_at",
    )
    .bind(account_id)
    .bind(product_id)
    .bind(quantity)
    .fetch_optional(&self.pool)
    .await?;
    Ok(line)
  }

  async fn remove_line(&self, account_id: Uuid, product_id: Uuid) -> Result<Option<CartLine>> {
    let line = sqlx::query_as::<_, CartLine>(
      "DELETE FROM cart_items WHERE account_id = $1 AND product_id = $2 \
       RETURNING account_id, product_id, product_name, unit_price_cents, quantity, added_at",
    )
    .bind(account_id)
    .bind(product_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(line)
  }

  async fn clear(&self, account_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE account_id = $1")
      .bind(account_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected())
  }
}

#[async_trait]
impl OrderStore for PgStore {
  #[instrument(name = "PgStore::insert_or_fetch", skip_all, fields(method = %order.payment_method, reference = %order.payment_reference))]
  async fn insert_or_fetch(&self, order: NewOrder, lines: Vec<LineItem>) -> Result<ClaimOutcome> {
    let mut tx = self.pool.begin().await?;

    let inserted = sqlx::query_as::<_, Order>(&format!(
      "INSERT INTO orders (id, account_id, subtotal_cents, delivery_fee_cents, benefit_discount_cents, promo_code, \
         promo_discount_cents, total_amount_cents, currency, payment_method, payment_status, payment_reference, \
         payer_email, paid_at, delivery_type, scheduled_at, eta_window_start, eta_window_end, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $19) \
       ON CONFLICT (payment_method, payment_reference) DO NOTHING \
       RETURNING {}",
      ORDER_COLUMNS
    ))
    .bind(order.id)
    .bind(order.account_id)
    .bind(order.subtotal_cents)
    .bind(order.delivery_fee_cents)
    .bind(order.benefit_discount_cents)
    .bind(&order.promo_code)
    .bind(order.promo_discount_cents)
    .bind(order.total_amount_cents)
    .bind(&order.currency)
    .bind(order.payment_method)
    .bind(order.payment_status)
    .bind(&order.payment_reference)
    .bind(&order.payer_email)
    .bind(order.paid_at)
    .bind(order.delivery_type)
    .bind(order.scheduled_at)
    .bind(order.eta_window_start)
    .bind(order.eta_window_end)
    .bind(order.created_at)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(created) = inserted else {
      // Lost the race (or a duplicate delivery): hand back the row that owns the key.
      tx.rollback().await?;
      let existing = sqlx::query_as::<_, Order>(&format!(
        "SELECT {} FROM orders WHERE payment_method = $1 AND payment_reference = $2",
        ORDER_COLUMNS
      ))
      .bind(order.payment_method)
      .bind(&order.payment_reference)
      .fetch_one(&self.pool)
      .await?;
      debug!(order_id = %existing.id, "Idempotency key already claimed.");
      return Ok(ClaimOutcome::Existing(existing));
    };

    for item in &lines {
      sqlx::query(
        "INSERT INTO order_items (id, order_id, product_id, product_name, unit_price_cents, quantity) \
         VALUES ($1, $2, $3, $4, $5, $6)",
      )
      .bind(Uuid::new_v4())
      .bind(created.id)
      .bind(item.product_id)
      .bind(&item.product_name)
      .bind(item.unit_price_cents)
      .bind(item.quantity)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(ClaimOutcome::Created(created))
  }

  async fn get(&self, id: Uuid) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(order)
  }

  async fn find_by_reference(&self, method: PaymentMethod, reference: &str) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(&format!(
      "SELECT {} FROM orders WHERE payment_method = $1 AND payment_reference = $2",
      ORDER_COLUMNS
    ))
    .bind(method)
    .bind(reference)
    .fetch_optional(&self.pool)
    .await?;
    Ok(order)
  }

  async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
    let lines = sqlx::query_as::<_, OrderLine>(
      "SELECT id, order_id, product_id, product_name, unit_price_cents, quantity FROM order_items WHERE order_id = $1",
    )
    .bind(order_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(lines)
  }

  async fn mark_paid(&self, id: Uuid, update: PaidUpdate) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(&format!(
      "UPDATE orders SET payment_status = $2, paid_at = $3, payer_email = COALESCE($4, payer_email), \
         delivery_type = COALESCE($5, delivery_type), scheduled_at = COALESCE($6, scheduled_at), \
         eta_window_start = COALESCE($7, eta_window_start), eta_window_end = COALESCE($8, eta_window_end), \
         promo_code = COALESCE($9, promo_code), promo_discount_cents = COALESCE($10, promo_discount_cents), \
         updated_at = NOW() \
       WHERE id = $1 AND payment_status NOT IN ('PAID', 'PARTIAL_REFUND', 'REFUNDED') \
       RETURNING {}",
      ORDER_COLUMNS
    ))
    .bind(id)
    .bind(PaymentStatus::Paid)
    .bind(update.paid_at)
    .bind(&update.payer_email)
    .bind(update.delivery_type)
    .bind(update.scheduled_at)
    .bind(update.eta_window_start)
    .bind(update.eta_window_end)
    .bind(&update.promo_code)
    .bind(update.promo_discount_cents)
    .fetch_optional(&self.pool)
    .await?;
    Ok(order)
  }

  async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(&format!(
      "SELECT {} FROM orders WHERE account_id = $1 ORDER BY created_at DESC",
      ORDER_COLUMNS
    ))
    .bind(account_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(orders)
  }

  async fn list_all(&self) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders ORDER BY created_at DESC", ORDER_COLUMNS))
      .fetch_all(&self.pool)
      .await?;
    Ok(orders)
  }

  async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
      "UPDATE orders SET payment_status = 'CANCELLED', updated_at = NOW() \
       WHERE payment_status IN ('PENDING', 'PROCESSING') AND created_at < $1",
    )
    .bind(cutoff)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected())
  }

  async fn sync_payment(&self, id: Uuid, sync: PaymentSync) -> Result<bool> {
    let result = sqlx::query(
      "UPDATE orders SET payment_status = 'PAID', \
         payment_method = COALESCE(payment_method, $2), \
         payment_reference = COALESCE(payment_reference, $3), \
         payer_email = COALESCE(payer_email, $4), \
         paid_at = COALESCE(paid_at, $5), \
         updated_at = NOW() \
       WHERE id = $1 AND payment_status NOT IN ('PAID', 'PARTIAL_REFUND', 'REFUNDED')",
    )
    .bind(id)
    .bind(sync.payment_method)
    .bind(&sync.payment_reference)
    .bind(&sync.payer_email)
    .bind(sync.paid_at)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn open_refund_request(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
      "UPDATE orders SET refund_status = 'REQUESTED', refund_reason = $2, refund_requested_at = $3, updated_at = $3 \
       WHERE id = $1 AND refund_status <> 'REQUESTED' AND payment_status IN ('PAID', 'PARTIAL_REFUND')",
    )
    .bind(id)
    .bind(reason)
    .bind(at)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn resolve_refund(&self, id: Uuid, resolution: RefundResolution) -> Result<Option<Order>> {
    let order = match resolution {
      RefundResolution::Approved {
        refunded_total_cents,
        payment_status,
        reviewed_at,
      } => {
        sqlx::query_as::<_, Order>(&format!(
          "UPDATE orders SET refund_status = $2, refunded_amount_cents = $3, payment_status = $4, \
             refund_reviewed_at = $5, updated_at = $5 \
           WHERE id = $1 AND refund_status = 'REQUESTED' RETURNING {}",
          ORDER_COLUMNS
        ))
        .bind(id)
        .bind(RefundStatus::Approved)
        .bind(refunded_total_cents)
        .bind(payment_status)
        .bind(reviewed_at)
        .fetch_optional(&self.pool)
        .await?
      }
      RefundResolution::Rejected { reviewed_at } => {
        sqlx::query_as::<_, Order>(&format!(
          "UPDATE orders SET refund_status = $2, refund_reviewed_at = $3, updated_at = $3 \
           WHERE id = $1 AND refund_status = 'REQUESTED' RETURNING {}",
          ORDER_COLUMNS
        ))
        .bind(id)
        .bind(RefundStatus::Rejected)
        .bind(reviewed_at)
        .fetch_optional(&self.pool)
        .await?
      }
    };
    Ok(order)
  }

  async fn set_delivery_status(&self, id: Uuid, from: DeliveryStatus, to: DeliveryStatus) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(&format!(
      "UPDATE orders SET delivery_status = $3, updated_at = NOW() \
       WHERE id = $1 AND delivery_status = $2 AND payment_status IN ('PAID', 'PARTIAL_REFUND') RETURNING {}",
      ORDER_COLUMNS
    ))
    .bind(id)
    .bind(from)
    .bind(to)
    .fetch_optional(&self.pool)
    .await?;
    Ok(order)
  }
}

#[async_trait]
impl LedgerStore for PgStore {
  async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
    let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
      "INSERT INTO transactions (id, order_id, payer_id, payer_email, amount_cents, currency, status, payment_method, \
         payment_reference, capture_id, refund_id, refund_note, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW()) RETURNING {}",
      LEDGER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(entry.order_id)
    .bind(&entry.payer_id)
    .bind(&entry.payer_email)
    .bind(entry.amount_cents)
    .bind(&entry.currency)
    .bind(entry.status)
    .bind(entry.payment_method)
    .bind(&entry.payment_reference)
    .bind(&entry.capture_id)
    .bind(&entry.refund_id)
    .bind(&entry.refund_note)
    .fetch_one(&self.pool)
    .await?;
    Ok(entry)
  }

  async fn for_order(&self, order_id: Uuid) -> Result<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
      "SELECT {} FROM transactions WHERE order_id = $1 ORDER BY created_at, id",
      LEDGER_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(entries)
  }

  async fn settled_payments(&self) -> Result<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
      "SELECT {} FROM transactions WHERE status IN ($1, $2) ORDER BY created_at",
      LEDGER_COLUMNS
    ))
    .bind(LedgerStatus::Completed)
    .bind(LedgerStatus::Paid)
    .fetch_all(&self.pool)
    .await?;
    Ok(entries)
  }
}

#[async_trait]
impl SubscriptionStore for PgStore {
  async fn current(&self, account_id: Uuid) -> Result<Option<Subscription>> {
    let subscription = sqlx::query_as::<_, Subscription>(
      "SELECT id, account_id, plan, status, start_date, end_date, auto_renew, cancel_at_period_end, updated_at \
       FROM subscriptions WHERE account_id = $1 ORDER BY start_date DESC LIMIT 1",
    )
    .bind(account_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(subscription)
  }

  async fn save(&self, subscription: Subscription) -> Result<()> {
    sqlx::query(
      "INSERT INTO subscriptions (id, account_id, plan, status, start_date, end_date, auto_renew, cancel_at_period_end, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
       ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, end_date = EXCLUDED.end_date, \
         auto_renew = EXCLUDED.auto_renew, cancel_at_period_end = EXCLUDED.cancel_at_period_end, \
         updated_at = EXCLUDED.updated_at",
    )
    .bind(subscription.id)
    .bind(subscription.account_id)
    .bind(subscription.plan)
    .bind(subscription.status)
    .bind(subscription.start_date)
    .bind(subscription.end_date)
    .bind(subscription.auto_renew)
    .bind(subscription.cancel_at_period_end)
    .bind(subscription.updated_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}

#[async_trait]
impl PromoStore for PgStore {
  async fn find_active(&self, code: &str, now: DateTime<Utc>) -> Result<Option<PromoCode>> {
    let promo = sqlx::query_as::<_, PromoCode>(
      "SELECT code, percent_off, expires_at, active FROM promo_codes \
       WHERE code = $1 AND active AND (expires_at IS NULL OR expires_at > $2) LIMIT 1",
    )
    .bind(code)
    .bind(now)
    .fetch_optional(&self.pool)
    .await?;
    Ok(promo)
  }

  async fn upsert(&self, promo: PromoCode) -> Result<()> {
    sqlx::query(
      "INSERT INTO promo_codes (code, percent_off, expires_at, active) VALUES ($1, $2, $3, $4) \
       ON CONFLICT (code) DO UPDATE SET percent_off = EXCLUDED.percent_off, expires_at = EXCLUDED.expires_at, \
         active = EXCLUDED.active",
    )
    .bind(&promo.code)
    .bind(promo.percent_off)
    .bind(promo.expires_at)
    .bind(promo.active)
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}

#[async_trait]
impl WalletStore for PgStore {
  async fn post(&self, account_id: Uuid, amount_cents: i64, reference: &str) -> Result<i64> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("INSERT INTO wallet_ledger (id, account_id, amount_cents, reference) VALUES ($1, $2, $3, $4)")
      .bind(Uuid::new_v4())
      .bind(account_id)
      .bind(amount_cents)
      .bind(reference)
      .execute(&mut *tx)
      .await?;
    let balance: i64 = sqlx::query_scalar(
      "INSERT INTO wallets (account_id, balance_cents, updated_at) VALUES ($1, $2, NOW()) \
       ON CONFLICT (account_id) DO UPDATE SET balance_cents = wallets.balance_cents + EXCLUDED.balance_cents, \
         updated_at = NOW() \
       RETURNING balance_cents",
    )
    .bind(account_id)
    .bind(amount_cents)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(balance)
  }

  async fn balance(&self, account_id: Uuid) -> Result<i64> {
    let balance: Option<i64> = sqlx::query_scalar("SELECT balance_cents FROM wallets WHERE account_id = $1")
      .bind(account_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(balance.unwrap_or(0))
  }

  async fn history(&self, account_id: Uuid) -> Result<Vec<WalletEntry>> {
    let entries = sqlx::query_as::<_, WalletEntry>(
      "SELECT id, account_id, amount_cents, reference, created_at FROM wallet_ledger \
       WHERE account_id = $1 ORDER BY created_at",
    )
    .bind(account_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(entries)
  }
}
