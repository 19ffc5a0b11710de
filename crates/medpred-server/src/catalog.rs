//! Data access for outlets, products, and reports.
//!
//! Handlers talk to the [`Catalog`] trait; [`PgCatalog`] implements it with
//! parameterized queries over a PostgreSQL pool.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use medpred_core::{AssignedProduct, Medpred, ProductMatch};

/// Maximum number of rows returned by a product search.
pub const PRODUCT_SEARCH_LIMIT: i64 = 10;

/// Errors returned by the data-access layer.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The change would duplicate an existing record.
    #[error("{0}")]
    Conflict(String),
}

/// Parameterized queries used by the HTTP handlers.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All medpreds ordered by name.
    async fn list_medpreds(&self) -> Result<Vec<Medpred>, CatalogError>;

    /// Products assigned to one medpred, ordered by product name.
    async fn medpred_products(&self, medpred_id: i32) -> Result<Vec<AssignedProduct>, CatalogError>;

    /// Case-insensitive substring search on product names.
    async fn search_products(&self, term: &str) -> Result<Vec<ProductMatch>, CatalogError>;

    /// Assign a product (looked up by name) to a medpred.
    async fn assign_product(&self, medpred_id: i32, product_name: &str) -> Result<(), CatalogError>;

    /// Remove an assignment.
    async fn unassign_product(&self, medpred_id: i32, product_name: &str) -> Result<(), CatalogError>;

    /// Assigned products joined with their stock and sales figures.
    async fn mp_zayavka_report(&self) -> Result<Vec<Value>, CatalogError>;

    /// Per-product pivot of stock and sales across the given outlets.
    async fn assortment_plan(&self, department_groups: &[String]) -> Result<Vec<Value>, CatalogError>;

    /// Suggested stock transfers from overstocked to understocked outlets.
    async fn transfer_suggestions(&self) -> Result<Vec<Value>, CatalogError>;
}

/// [`Catalog`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connect a new pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Database pool connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn json_rows(&self, query: &str) -> Result<Vec<Value>, CatalogError> {
        let sql = wrap_as_json_rows(query);
        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn list_medpreds(&self) -> Result<Vec<Medpred>, CatalogError> {
        let rows = sqlx::query_as::<_, (i32, String)>(
            "SELECT id::int4, medpred_name::text FROM medpreds ORDER BY medpred_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, medpred_name)| Medpred { id, medpred_name })
            .collect())
    }

    async fn medpred_products(&self, medpred_id: i32) -> Result<Vec<AssignedProduct>, CatalogError> {
        let rows = sqlx::query_as::<_, (i32, String, Option<String>, Option<NaiveDateTime>)>(
            r#"
            SELECT mp.id::int4, mp.product_name::text, mp.product_code::text, mp.assigned_date::timestamp
            FROM medpred_products mp
            WHERE mp.medpred_id = $1
            ORDER BY mp.product_name
            "#,
        )
        .bind(medpred_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, product_name, product_code, assigned_date)| AssignedProduct {
                id,
                product_name,
                product_code,
                assigned_date,
            })
            .collect())
    }

    async fn search_products(&self, term: &str) -> Result<Vec<ProductMatch>, CatalogError> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
            SELECT product_name::text, product_code::text
            FROM products
            WHERE product_name ILIKE $1
            ORDER BY product_name
            LIMIT $2
            "#,
        )
        .bind(like_pattern(term))
        .bind(PRODUCT_SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(product_name, product_code)| ProductMatch {
                product_name,
                product_code,
            })
            .collect())
    }

    async fn assign_product(&self, medpred_id: i32, product_name: &str) -> Result<(), CatalogError> {
        let medpred_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM medpreds WHERE id = $1)")
                .bind(medpred_id)
                .fetch_one(&self.pool)
                .await?;
        if !medpred_exists {
            return Err(CatalogError::NotFound("Medpred"));
        }

        let product_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE product_name = $1)")
                .bind(product_name)
                .fetch_one(&self.pool)
                .await?;
        if !product_exists {
            return Err(CatalogError::NotFound("Product"));
        }

        let already_assigned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM medpred_products WHERE medpred_id = $1 AND product_name = $2)",
        )
        .bind(medpred_id)
        .bind(product_name)
        .fetch_one(&self.pool)
        .await?;
        if already_assigned {
            return Err(CatalogError::Conflict(
                "Product already assigned to this medpred".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO medpred_products (medpred_id, product_id, product_name, product_code, assigned_date)
            SELECT $1, p.id, p.product_name, p.product_code, NOW()
            FROM products p
            WHERE p.product_name = $2
            LIMIT 1
            "#,
        )
        .bind(medpred_id)
        .bind(product_name)
        .execute(&self.pool)
        .await?;

        debug!(medpred_id, product_name, "Product assigned");
        Ok(())
    }

    async fn unassign_product(&self, medpred_id: i32, product_name: &str) -> Result<(), CatalogError> {
        let result =
            sqlx::query("DELETE FROM medpred_products WHERE medpred_id = $1 AND product_name = $2")
                .bind(medpred_id)
                .bind(product_name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound("Assignment"));
        }
        debug!(medpred_id, product_name, "Product unassigned");
        Ok(())
    }

    async fn mp_zayavka_report(&self) -> Result<Vec<Value>, CatalogError> {
        self.json_rows(MP_ZAYAVKA_SQL).await
    }

    async fn assortment_plan(&self, department_groups: &[String]) -> Result<Vec<Value>, CatalogError> {
        let sql = wrap_as_json_rows(&assortment_plan_sql(department_groups));
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for group in department_groups {
            query = query.bind(group);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn transfer_suggestions(&self) -> Result<Vec<Value>, CatalogError> {
        self.json_rows(TRANSFERS_SQL).await
    }
}

/// `%term%` for ILIKE, with the pattern metacharacters in `term` escaped.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn wrap_as_json_rows(query: &str) -> String {
    format!("SELECT row_to_json(t) FROM ({}) t", query.trim().trim_end_matches(';'))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column suffix and aggregate expression for each per-outlet figure.
const PLAN_COLUMNS: &[(&str, &str)] = &[
    ("Сумма прибыли", "SUM(profit_sum)"),
    ("Статус", "MAX(status)"),
    ("Текущий запас", "SUM(current_stock)"),
    ("Скорость продаж", "AVG(sales_rate)"),
    ("Максимальный запас", "MAX(max_stock)"),
    ("Точка заказа запаса", "SUM(order_point_stock)"),
    ("Категория ABC", "MAX(abc_category)"),
    ("Категория XYZ", "MAX(xyz_category)"),
];

/// Longest identifier PostgreSQL keeps, in bytes.
const PG_IDENTIFIER_MAX: usize = 63;

/// Short names the report consumers already know these columns by.
const LEGACY_ALIASES: &[(&str, &str, &str)] = &[
    ("А. Бокейхана 32", "Точка заказа запаса", "А. Бо - Точ"),
    ("Асфендиярова 2", "Максимальный запас", "Асф - Мак"),
    ("Асфендиярова 2", "Точка заказа запаса", "Ас - Точка"),
];

/// Output column name for one outlet/metric pair.
///
/// PostgreSQL silently truncates longer identifiers, which would make
/// different columns collide, so the outlet part is shortened to fit.
fn column_alias(group: &str, suffix: &str) -> String {
    if let Some((_, _, alias)) = LEGACY_ALIASES
        .iter()
        .find(|(g, s, _)| *g == group && *s == suffix)
    {
        return (*alias).to_string();
    }

    let full = format!("{} - {}", group, suffix);
    if full.len() <= PG_IDENTIFIER_MAX {
        return full;
    }

    let mut prefix: String = group.to_string();
    while !prefix.is_empty() {
        prefix.pop();
        let candidate = format!("{} - {}", prefix.trim_end(), suffix);
        if candidate.len() <= PG_IDENTIFIER_MAX {
            return candidate;
        }
    }

    let mut end = PG_IDENTIFIER_MAX.min(suffix.len());
    while !suffix.is_char_boundary(end) {
        end -= 1;
    }
    suffix[..end].to_string()
}

/// Assortment-plan pivot with one column block per outlet.
///
/// Outlet names are bound as `$1..$n` in `groups` order; they also name the
/// output columns as quoted identifiers (see [`column_alias`]).
pub fn assortment_plan_sql(groups: &[String]) -> String {
    let mut sql = String::from("SELECT product_name AS \"Продукт\"");

    for (index, group) in groups.iter().enumerate() {
        let param = index + 1;
        for (suffix, aggregate) in PLAN_COLUMNS {
            let filtered = format!("{} FILTER (WHERE department_group = ${})", aggregate, param);
            let expr = if aggregate.starts_with("AVG") {
                format!("ROUND(({})::numeric, 2)", filtered)
            } else {
                filtered
            };
            let alias = quote_ident(&column_alias(group, suffix));
            sql.push_str(&format!(", {} AS {}", expr, alias));
        }
    }

    sql.push_str(", SUM(profit_sum) AS \"Общая сумма прибыли\"");
    sql.push_str(" FROM products GROUP BY product_name ORDER BY \"Общая сумма прибыли\" DESC");
    sql
}

const MP_ZAYAVKA_SQL: &str = r#"
    SELECT
        m.medpred_name,
        mp.product_name AS medpred_product_name,
        p.department_group,
        p.current_stock,
        p.sales_rate,
        p.abc_category,
        p.xyz_category,
        p.profit_sum,
        p.status
    FROM public.medpred_products mp
    INNER JOIN public.products p
        ON LOWER(mp.product_name) = LOWER(p.product_name)
    INNER JOIN public.medpreds m
        ON mp.medpred_id = m.id
    ORDER BY m.medpred_name ASC, p.department_group ASC
"#;

const TRANSFERS_SQL: &str = r#"
    WITH candidates AS (
        SELECT
            (d.current_stock * d.average_purchase_price) AS donor_inventory_value,
            d.product_name AS product_name,
            d.department_group AS donor_pharmacy,
            d.sales_rate AS donor_sales_rate,
            d.current_stock AS donor_current_stock,
            r.department_group AS receiver_pharmacy,
            r.sales_rate AS receiver_sales_rate,
            r.current_stock AS receiver_current_stock,
            CASE
                WHEN d.sales_rate IS NULL THEN (d.current_stock - 1)
                ELSE (d.current_stock - 2 * d.sales_rate)
            END AS donor_surplus,
            (2 * r.sales_rate - r.current_stock) AS receiver_deficit
        FROM products AS d
        JOIN products AS r
            ON d.product_code = r.product_code
           AND d.department_group <> r.department_group
        WHERE r.sales_rate IS NOT NULL
    )
    SELECT
        donor_inventory_value,
        product_name,
        donor_pharmacy,
        donor_sales_rate,
        donor_current_stock,
        receiver_pharmacy,
        receiver_sales_rate,
        receiver_current_stock,
        FLOOR(LEAST(donor_surplus, receiver_deficit)) AS transfer_qty
    FROM candidates
    WHERE donor_surplus > 0
      AND receiver_deficit > 0
      AND FLOOR(LEAST(donor_surplus, receiver_deficit)) >= 1
    ORDER BY donor_inventory_value DESC
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("аспирин"), "%аспирин%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern(""), "%%");
    }

    #[test]
    fn test_assortment_plan_sql_binds_each_group() {
        let groups = vec!["Пушкина 1".to_string(), "Жумабаева 3".to_string()];
        let sql = assortment_plan_sql(&groups);
        assert!(sql.contains("department_group = $1"));
        assert!(sql.contains("department_group = $2"));
        assert!(!sql.contains("$3"));
        assert!(!sql.contains("'Пушкина 1'"));
        assert!(sql.contains("ROUND((AVG(sales_rate) FILTER (WHERE department_group = $2))::numeric, 2)"));
        assert!(sql.contains("AS \"Пушкина 1 - Сумма прибыли\""));
        assert!(sql.contains("AS \"Жумабаева 3 - Категория XYZ\""));
        assert_eq!(sql.matches(" AS \"").count(), 2 + 2 * PLAN_COLUMNS.len());
        assert!(sql.ends_with("ORDER BY \"Общая сумма прибыли\" DESC"));
    }

    #[test]
    fn test_column_aliases_fit_postgres_identifiers() {
        let groups = crate::config::default_department_groups();
        let mut seen = std::collections::HashSet::new();
        for group in &groups {
            for (suffix, _) in PLAN_COLUMNS {
                let alias = column_alias(group, suffix);
                assert!(alias.len() <= PG_IDENTIFIER_MAX, "{} is {} bytes", alias, alias.len());
                assert!(seen.insert(alias.clone()), "duplicate alias {}", alias);
            }
        }
    }

    #[test]
    fn test_legacy_column_aliases() {
        assert_eq!(column_alias("А. Бокейхана 32", "Точка заказа запаса"), "А. Бо - Точ");
        assert_eq!(column_alias("Асфендиярова 2", "Максимальный запас"), "Асф - Мак");
        assert_eq!(column_alias("Асфендиярова 2", "Точка заказа запаса"), "Ас - Точка");
        assert_eq!(column_alias("А. Бокейхана 32", "Статус"), "А. Бокейхана 32 - Статус");

        let sql = assortment_plan_sql(&["Асфендиярова 2".to_string()]);
        assert!(sql.contains("AS \"Асф - Мак\""));
        assert!(!sql.contains("Асфендиярова 2 - Точка заказа запаса"));
    }

    #[test]
    fn test_long_group_name_is_shortened() {
        let group = "Проспект Назарбаева 100 корпус 2";
        let alias = column_alias(group, "Точка заказа запаса");
        assert!(alias.len() <= PG_IDENTIFIER_MAX);
        assert!(alias.ends_with(" - Точка заказа запаса"));
        assert!(alias.starts_with("Проспект"));
    }

    #[test]
    fn test_assortment_plan_sql_escapes_group_names() {
        let groups = vec!["Evil\" FROM x --".to_string()];
        let sql = assortment_plan_sql(&groups);
        assert!(sql.contains("\"Evil\"\" FROM x -- - Статус\""));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_wrap_as_json_rows_strips_semicolon() {
        assert_eq!(
            wrap_as_json_rows("SELECT 1;\n"),
            "SELECT row_to_json(t) FROM (SELECT 1) t"
        );
    }
}
