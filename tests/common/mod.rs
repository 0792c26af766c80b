//! Shared entities, commands and queries for the integration tests.
//!
//! The model is a small bike store: brands, categories and products. Every
//! statement carries the `/*schema*/ ` placeholder so each test runs with a
//! schema qualifier substituted.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sqlctx::config::{PoolOptions, TargetConfig};
use sqlctx::db::{ColumnMap, Mapped, ResultSets, WriteSession};
use sqlctx::models::{ConnectionConfig, DatabaseType};
use sqlctx::{
    BatchCommand, Command, ContextFactory, ContextOptions, DbError, DbResult, Query, ReadSession,
    RowCountCommand, SqlTemplate, Statement,
};
use std::time::Duration;

// =========================================================================
// Entities
// =========================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Brand {
    pub id: i64,
    pub name: String,
}

impl Mapped for Brand {
    const COLUMNS: ColumnMap = ColumnMap::new("ctx_brands", &[("id", "brand_id"), ("name", "brand_name")]);
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Category {
    pub category_id: i64,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub product_name: String,
    pub brand_id: i64,
    pub category_id: Option<i64>,
    pub model_year: i64,
    pub list_price: f64,
    #[serde(default)]
    pub category: Option<Category>,
}

impl Mapped for Product {
    const COLUMNS: ColumnMap = ColumnMap::new(
        "ctx_products",
        &[
            ("product_id", "product_id"),
            ("product_name", "product_name"),
            ("brand_id", "brand_id"),
            ("category_id", "category_id"),
            ("model_year", "model_year"),
            ("list_price", "list_price"),
        ],
    );
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProduct {
    pub product_name: String,
    pub brand_id: i64,
    pub category_id: Option<i64>,
    pub model_year: i64,
    pub list_price: f64,
}

impl NewProduct {
    pub fn new(name: &str, brand_id: i64, category_id: Option<i64>) -> Self {
        Self {
            product_name: name.to_string(),
            brand_id,
            category_id,
            model_year: 2024,
            list_price: 499.5,
        }
    }
}

// =========================================================================
// Templates
// =========================================================================

pub const INSERT_PRODUCT: SqlTemplate = SqlTemplate::new(
    "products.insert",
    "INSERT INTO /*schema*/ ctx_products (product_name, brand_id, category_id, model_year, list_price) \
     VALUES (@product_name, @brand_id, @category_id, @model_year, @list_price)",
);

pub const COUNT_BRANDS: SqlTemplate =
    SqlTemplate::new("brands.count", "SELECT COUNT(*) AS n FROM /*schema*/ ctx_brands");

pub const BRAND_ID_BY_NAME: SqlTemplate = SqlTemplate::new(
    "brands.id_by_name",
    "SELECT brand_id FROM /*schema*/ ctx_brands WHERE brand_name = @name",
);

pub const MAX_BRAND_ID: SqlTemplate =
    SqlTemplate::new("brands.max_id", "SELECT MAX(brand_id) FROM /*schema*/ ctx_brands");

pub const DELETE_BRAND: SqlTemplate = SqlTemplate::new(
    "brands.delete",
    "DELETE FROM /*schema*/ ctx_brands WHERE brand_id = @id",
);

pub const TEMPLATES: &[SqlTemplate] = &[
    INSERT_PRODUCT,
    COUNT_BRANDS,
    BRAND_ID_BY_NAME,
    MAX_BRAND_ID,
    DELETE_BRAND,
];

fn ddl(db_type: DatabaseType) -> &'static [&'static str] {
    match db_type {
        DatabaseType::SQLite => &[
            "DROP TABLE IF EXISTS /*schema*/ ctx_products",
            "DROP TABLE IF EXISTS /*schema*/ ctx_categories",
            "DROP TABLE IF EXISTS /*schema*/ ctx_brands",
            "CREATE TABLE /*schema*/ ctx_brands (brand_id INTEGER PRIMARY KEY AUTOINCREMENT, brand_name TEXT NOT NULL UNIQUE)",
            "CREATE TABLE /*schema*/ ctx_categories (category_id INTEGER PRIMARY KEY AUTOINCREMENT, category_name TEXT NOT NULL)",
            "CREATE TABLE /*schema*/ ctx_products (product_id INTEGER PRIMARY KEY AUTOINCREMENT, product_name TEXT NOT NULL, \
             brand_id INTEGER NOT NULL REFERENCES ctx_brands(brand_id), category_id INTEGER REFERENCES ctx_categories(category_id), \
             model_year INTEGER NOT NULL, list_price REAL NOT NULL)",
        ],
        DatabaseType::MySQL => &[
            "DROP TABLE IF EXISTS /*schema*/ ctx_products",
            "DROP TABLE IF EXISTS /*schema*/ ctx_categories",
            "DROP TABLE IF EXISTS /*schema*/ ctx_brands",
            "CREATE TABLE /*schema*/ ctx_brands (brand_id BIGINT AUTO_INCREMENT PRIMARY KEY, brand_name VARCHAR(255) NOT NULL UNIQUE) ENGINE=InnoDB",
            "CREATE TABLE /*schema*/ ctx_categories (category_id BIGINT AUTO_INCREMENT PRIMARY KEY, category_name VARCHAR(255) NOT NULL) ENGINE=InnoDB",
            "CREATE TABLE /*schema*/ ctx_products (product_id BIGINT AUTO_INCREMENT PRIMARY KEY, product_name VARCHAR(255) NOT NULL, \
             brand_id BIGINT NOT NULL, category_id BIGINT NULL, model_year SMALLINT NOT NULL, list_price DECIMAL(10, 2) NOT NULL, \
             FOREIGN KEY (brand_id) REFERENCES ctx_brands (brand_id), FOREIGN KEY (category_id) REFERENCES ctx_categories (category_id)) ENGINE=InnoDB",
        ],
        DatabaseType::PostgreSQL => &[
            "DROP TABLE IF EXISTS /*schema*/ ctx_products",
            "DROP TABLE IF EXISTS /*schema*/ ctx_categories",
            "DROP TABLE IF EXISTS /*schema*/ ctx_brands",
            "CREATE TABLE /*schema*/ ctx_brands (brand_id BIGSERIAL PRIMARY KEY, brand_name VARCHAR(255) NOT NULL UNIQUE)",
            "CREATE TABLE /*schema*/ ctx_categories (category_id BIGSERIAL PRIMARY KEY, category_name VARCHAR(255) NOT NULL)",
            "CREATE TABLE /*schema*/ ctx_products (product_id BIGSERIAL PRIMARY KEY, product_name VARCHAR(255) NOT NULL, \
             brand_id BIGINT NOT NULL REFERENCES /*schema*/ ctx_brands (brand_id), \
             category_id BIGINT REFERENCES /*schema*/ ctx_categories (category_id), \
             model_year SMALLINT NOT NULL, list_price DECIMAL(10, 2) NOT NULL)",
        ],
        DatabaseType::Mssql => &[
            "IF OBJECT_ID('/*schema*/ ctx_products', 'U') IS NOT NULL DROP TABLE /*schema*/ ctx_products",
            "IF OBJECT_ID('/*schema*/ ctx_categories', 'U') IS NOT NULL DROP TABLE /*schema*/ ctx_categories",
            "IF OBJECT_ID('/*schema*/ ctx_brands', 'U') IS NOT NULL DROP TABLE /*schema*/ ctx_brands",
            "CREATE TABLE /*schema*/ ctx_brands (brand_id BIGINT IDENTITY(1, 1) PRIMARY KEY, brand_name NVARCHAR(255) NOT NULL UNIQUE)",
            "CREATE TABLE /*schema*/ ctx_categories (category_id BIGINT IDENTITY(1, 1) PRIMARY KEY, category_name NVARCHAR(255) NOT NULL)",
            "CREATE TABLE /*schema*/ ctx_products (product_id BIGINT IDENTITY(1, 1) PRIMARY KEY, product_name NVARCHAR(255) NOT NULL, \
             brand_id BIGINT NOT NULL REFERENCES /*schema*/ ctx_brands (brand_id), \
             category_id BIGINT NULL REFERENCES /*schema*/ ctx_categories (category_id), \
             model_year SMALLINT NOT NULL, list_price DECIMAL(10, 2) NOT NULL)",
        ],
    }
}

// =========================================================================
// Commands
// =========================================================================

/// Drop and recreate the test tables.
pub struct CreateSchema;

impl RowCountCommand for CreateSchema {
    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<u64> {
        for sql in ddl(session.db_type()) {
            session.execute_row_count(&Statement::new(*sql)).await?;
        }
        Ok(0)
    }
}

/// Insert a row and return its generated id, the way each dialect reports it.
async fn insert_returning_id(
    session: &mut WriteSession<'_>,
    table: &str,
    column: &str,
    value: &str,
    id_column: &str,
) -> DbResult<i64> {
    let sql = match session.db_type() {
        DatabaseType::Mssql => format!(
            "INSERT INTO /*schema*/ {table} ({column}) OUTPUT INSERTED.{id_column} VALUES (@value)"
        ),
        DatabaseType::PostgreSQL => format!(
            "INSERT INTO /*schema*/ {table} ({column}) VALUES (@value) RETURNING {id_column}"
        ),
        _ => format!("INSERT INTO /*schema*/ {table} ({column}) VALUES (@value)"),
    };
    let statement = Statement::new(sql).param("value", value);
    match session.db_type() {
        DatabaseType::Mssql | DatabaseType::PostgreSQL => session.execute_scalar(&statement).await,
        _ => session
            .execute_outcome(&statement)
            .await?
            .last_insert_id
            .ok_or_else(|| DbError::no_result("insert")),
    }
}

pub struct InsertBrand(pub &'static str);

impl Command for InsertBrand {
    type Output = i64;

    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<i64> {
        insert_returning_id(session, "ctx_brands", "brand_name", self.0, "brand_id").await
    }
}

pub struct InsertCategory(pub &'static str);

impl Command for InsertCategory {
    type Output = i64;

    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<i64> {
        insert_returning_id(
            session,
            "ctx_categories",
            "category_name",
            self.0,
            "category_id",
        )
        .await
    }
}

pub struct InsertProduct(pub NewProduct);

impl RowCountCommand for InsertProduct {
    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<u64> {
        session
            .execute_row_count(&Statement::template(&INSERT_PRODUCT).with_params(&self.0)?)
            .await
    }
}

pub fn insert_products(products: Vec<NewProduct>) -> BatchCommand<NewProduct> {
    BatchCommand::from_template(&INSERT_PRODUCT, products)
}

pub struct DeleteBrand(pub i64);

impl RowCountCommand for DeleteBrand {
    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<u64> {
        session
            .execute_row_count(&Statement::template(&DELETE_BRAND).param("id", self.0))
            .await
    }
}

// =========================================================================
// Queries
// =========================================================================

fn brand_select() -> String {
    format!(
        "SELECT {} FROM {}",
        Brand::COLUMNS.select_list(None),
        Brand::COLUMNS.qualified_table()
    )
}

pub struct BrandById(pub i64);

impl Query for BrandById {
    type Output = Option<Brand>;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Option<Brand>> {
        let sql = format!("{} WHERE brand_id = @id", brand_select());
        session
            .select_first(&Statement::new(sql).param("id", self.0))
            .await
    }
}

pub struct BrandByName(pub &'static str);

impl Query for BrandByName {
    type Output = Brand;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Brand> {
        let sql = format!("{} WHERE brand_name = @name", brand_select());
        session
            .select_single(&Statement::new(sql).param("name", self.0))
            .await
    }
}

pub struct AllBrands;

impl Query for AllBrands {
    type Output = Vec<Brand>;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Vec<Brand>> {
        let sql = format!("{} ORDER BY brand_id", brand_select());
        session.select_many(&Statement::new(sql)).await
    }
}

pub struct CountBrands;

impl Query for CountBrands {
    type Output = i64;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<i64> {
        session.select_scalar(&Statement::template(&COUNT_BRANDS)).await
    }
}

pub struct BrandIdByName(pub &'static str);

impl Query for BrandIdByName {
    type Output = i64;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<i64> {
        session
            .select_scalar(&Statement::template(&BRAND_ID_BY_NAME).param("name", self.0))
            .await
    }
}

pub struct MaxBrandId;

impl Query for MaxBrandId {
    type Output = Option<i64>;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Option<i64>> {
        session.select_scalar(&Statement::template(&MAX_BRAND_ID)).await
    }
}

fn products_with_category_sql() -> String {
    format!(
        "SELECT {}, c.category_id, c.category_name \
         FROM {} p LEFT JOIN /*schema*/ ctx_categories c ON c.category_id = p.category_id \
         ORDER BY p.product_id",
        Product::COLUMNS.select_list(Some("p")),
        Product::COLUMNS.qualified_table()
    )
}

/// Products with their category, split on the category key.
pub struct ProductsWithCategory {
    pub split_on: &'static str,
}

impl Query for ProductsWithCategory {
    type Output = Vec<Product>;

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Vec<Product>> {
        session
            .select_many_join::<Product, Option<Category>, _>(
                &Statement::new(products_with_category_sql()),
                self.split_on,
                |mut product, category| {
                    product.category = category;
                    product
                },
            )
            .await
    }
}

#[derive(Debug, Deserialize)]
pub struct Count {
    pub n: i64,
}

/// All brands plus the product count, in one round trip.
pub struct BrandsAndProductCount;

impl Query for BrandsAndProductCount {
    type Output = (Vec<Brand>, i64);

    async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<(Vec<Brand>, i64)> {
        let sql = format!(
            "{} ORDER BY brand_id; SELECT COUNT(*) AS n FROM /*schema*/ ctx_products",
            brand_select()
        );
        let mut sets: ResultSets = session.select_multiple(&Statement::new(sql)).await?;
        let brands = sets.read_at(0)?;
        let count: Count = sets.read_single()?;
        Ok((brands, count.n))
    }
}

// =========================================================================
// Setup
// =========================================================================

pub fn sqlite_config(dir: &tempfile::TempDir, schema: Option<&str>) -> ConnectionConfig {
    let pool_options = PoolOptions {
        max_connections: Some(4),
        ..Default::default()
    };
    ConnectionConfig::new(
        "local",
        format!("sqlite:{}", dir.path().join("bikes.db").display()),
        schema.map(str::to_string),
        pool_options,
    )
    .unwrap()
}

pub fn test_options() -> ContextOptions {
    ContextOptions {
        default_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(10),
        streaming_joins: false,
    }
}

/// A SQLite factory with fresh tables, qualified by `main.`.
pub async fn sqlite_factory(dir: &tempfile::TempDir) -> ContextFactory {
    sqlite_factory_with(dir, test_options()).await
}

pub async fn sqlite_factory_with(dir: &tempfile::TempDir, options: ContextOptions) -> ContextFactory {
    let factory = ContextFactory::connect(&sqlite_config(dir, Some("main.")), options)
        .await
        .expect("Failed to open SQLite factory");
    create_tables(&factory).await;
    factory
}

pub async fn create_tables(factory: &ContextFactory) {
    let mut context = factory.create(None).await.expect("Failed to open context");
    context
        .execute_count(&CreateSchema)
        .await
        .expect("Failed to create tables");
    context.close().await;
}

/// Factory for the server URL in `env_var`, or `None` when it is unset.
///
/// The URL uses target syntax, so it carries `schema=` and any pool or
/// SQL Server options.
pub async fn server_factory(env_var: &str) -> Option<ContextFactory> {
    let url = match std::env::var(env_var) {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: {env_var} not set");
            return None;
        }
    };
    let config = TargetConfig::parse(&format!("server={url}"))
        .and_then(TargetConfig::into_connection_config)
        .expect("Invalid test server URL");
    let factory = ContextFactory::connect(&config, test_options())
        .await
        .expect("Failed to connect to test server");
    create_tables(&factory).await;
    Some(factory)
}
