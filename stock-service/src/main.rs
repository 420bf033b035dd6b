use anyhow::Context;
use common_observability::StockMetrics;
use sqlx::PgPool;
use std::{env, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

use stock_service::{build_router, AppState, StockConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    common_money::log_rounding_mode_once();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db_pool = PgPool::connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let config = StockConfig::from_env();
    let metrics = Arc::new(StockMetrics::new());
    let state = AppState {
        db: db_pool,
        config,
        metrics,
    };

    #[cfg(feature = "kafka-consumer")]
    spawn_order_consumer(state.clone());

    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8086);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));
    println!("starting stock-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Optional bus transport for the order trigger; the HTTP entry point at
/// POST /orders/events is always available.
#[cfg(feature = "kafka-consumer")]
fn spawn_order_consumer(state: AppState) {
    use futures::StreamExt;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::Message;
    use stock_service::order_trigger::{handle_order_event, OrderEvent};

    let consumer: StreamConsumer = rdkafka::ClientConfig::new()
        .set(
            "bootstrap.servers",
            &env::var("KAFKA_BOOTSTRAP").unwrap_or("localhost:9092".into()),
        )
        .set("group.id", "stock-service")
        .set("enable.auto.commit", "true")
        .create()
        .expect("failed to create kafka consumer");
    consumer
        .subscribe(&["order.created", "order.updated"])
        .expect("failed to subscribe to order topics");

    tokio::spawn(async move {
        let mut stream = consumer.stream();
        while let Some(message) = stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(text)) = m.payload_view::<str>() {
                        match serde_json::from_str::<OrderEvent>(text) {
                            Ok(event) => {
                                if let Err(err) = handle_order_event(&state, &event).await {
                                    tracing::error!(
                                        ?err,
                                        order_reference = %event.order_reference,
                                        "Failed to apply order event from bus"
                                    );
                                }
                            }
                            Err(err) => tracing::error!(?err, "Failed to parse order event payload"),
                        }
                    }
                }
                Err(err) => tracing::error!(?err, "Kafka error"),
            }
        }
    });
}
