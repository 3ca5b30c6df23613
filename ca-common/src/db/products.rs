//! Product queries

use crate::db::NewProduct;
use crate::time::{now, to_db};
use crate::Result;
use sqlx::SqlitePool;

/// Insert a product, returning the new `product_id`
pub async fn insert_product(pool: &SqlitePool, product: &NewProduct) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO products (name, category, price, description, attributes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&product.name)
    .bind(&product.category)
    .bind(product.price)
    .bind(&product.description)
    .bind(product.attributes.to_string())
    .bind(to_db(now()))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert many products in one transaction, returning their ids in order
pub async fn insert_products_batch(pool: &SqlitePool, products: &[NewProduct]) -> Result<Vec<i64>> {
    let created_at = to_db(now());
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(products.len());

    for product in products {
        let result = sqlx::query(
            r#"
            INSERT INTO products (name, category, price, description, attributes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.price)
        .bind(&product.description)
        .bind(product.attributes.to_string())
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        ids.push(result.last_insert_rowid());
    }

    tx.commit().await?;
    Ok(ids)
}

pub async fn count_products(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
