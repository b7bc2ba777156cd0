//! In-Process Simulated Gateway
//!
//! Implements the connector and transport ports over tokio channels: a
//! scripted gateway that answers `CreateOrder`, `RouteOrder`, and
//! `GroupRoute` requests with order/route identifiers and streams an
//! order/route blotter with initial-paint semantics. It exists for the
//! demo binary and the integration tests; it is not a broker emulation.
//!
//! # Streams
//!
//! - `orders`: one row per order: `ORDER_ID`, `TICKER`, `SIDE`,
//!   `AMOUNT`, `STATUS`, `FILLED`, `AVG_PRICE`
//! - `routes`: one row per route: `ROUTE_ID`, `ORDER_ID`, `BROKER`,
//!   `STATUS`, `FILLED`, `AVG_PRICE`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{
    ConnectionError, Endpoint, GatewayConnection, GatewayConnector, GatewayTransport,
    TransportError,
};
use crate::domain::correlation::CorrelationToken;
use crate::domain::event::{
    FieldMap, FieldValue, GatewayEvent, ResponseBody, ServiceStatus, SessionStatus,
    STATUS_HEARTBEAT, STATUS_INITIAL_PAINT, STATUS_INITIAL_PAINT_COMPLETE, STATUS_NEW,
    STATUS_UPDATE, SubscriptionStatus,
};
use crate::domain::request::GatewayRequest;
use crate::domain::subscription::{SubscriptionEntry, TopicSpec};

// =============================================================================
// Configuration
// =============================================================================

/// Knobs for the simulated gateway.
#[derive(Debug, Clone)]
pub struct SimGatewayConfig {
    /// The one service this gateway knows how to open.
    pub service: String,
    /// Pause between the route acknowledgement and each fill update.
    /// Zero makes the full fill sequence immediate (used by tests).
    pub fill_delay: Duration,
    /// Interval between subscription heartbeats; `None` disables them.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SimGatewayConfig {
    fn default() -> Self {
        Self {
            service: "//gateway/order-api".to_string(),
            fill_delay: Duration::from_millis(150),
            heartbeat_interval: None,
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Connector producing in-process sessions against the sim core.
pub struct SimGateway {
    config: SimGatewayConfig,
}

impl SimGateway {
    /// Create a sim gateway with the given configuration.
    #[must_use]
    pub const fn new(config: SimGatewayConfig) -> Self {
        Self { config }
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new(SimGatewayConfig::default())
    }
}

#[async_trait]
impl GatewayConnector for SimGateway {
    async fn connect(&self, endpoint: &Endpoint) -> Result<GatewayConnection, ConnectionError> {
        // Port 0 stands in for an unreachable back-end.
        if endpoint.port == 0 {
            return Err(ConnectionError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let core = SimCore::new(self.config.clone(), event_tx.clone(), command_rx);
        tokio::spawn(core.run());

        let _ = event_tx.send(GatewayEvent::SessionStatus(SessionStatus::ConnectionUp));
        let _ = event_tx.send(GatewayEvent::SessionStatus(SessionStatus::Started));

        Ok(GatewayConnection {
            transport: Arc::new(SimTransport {
                commands: command_tx,
            }),
            events: event_rx,
        })
    }
}

// =============================================================================
// Transport
// =============================================================================

enum SimCommand {
    OpenService(String),
    Request(GatewayRequest, CorrelationToken),
    Subscribe(Vec<SubscriptionEntry>),
}

struct SimTransport {
    commands: mpsc::UnboundedSender<SimCommand>,
}

impl GatewayTransport for SimTransport {
    fn open_service(&self, service: &str) -> Result<(), TransportError> {
        self.commands
            .send(SimCommand::OpenService(service.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    fn send_request(
        &self,
        request: GatewayRequest,
        token: CorrelationToken,
    ) -> Result<(), TransportError> {
        self.commands
            .send(SimCommand::Request(request, token))
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), TransportError> {
        self.commands
            .send(SimCommand::Subscribe(entries.to_vec()))
            .map_err(|_| TransportError::Closed)
    }
}

// =============================================================================
// Core
// =============================================================================

#[derive(Debug, Clone)]
struct OrderRow {
    id: i64,
    ticker: String,
    side: String,
    amount: i64,
    status: String,
    filled: i64,
    avg_price: f64,
    limit_price: Option<f64>,
}

#[derive(Debug, Clone)]
struct RouteRow {
    route_id: i64,
    order_id: i64,
    broker: String,
    status: String,
    filled: i64,
    avg_price: f64,
}

struct Subscriber {
    token: CorrelationToken,
    stream: String,
    fields: Vec<String>,
}

struct SimCore {
    config: SimGatewayConfig,
    events: mpsc::UnboundedSender<GatewayEvent>,
    commands: mpsc::UnboundedReceiver<SimCommand>,
    orders: HashMap<i64, OrderRow>,
    routes: HashMap<i64, RouteRow>,
    subscribers: Vec<Subscriber>,
    next_order_id: i64,
    next_route_id: i64,
}

impl SimCore {
    fn new(
        config: SimGatewayConfig,
        events: mpsc::UnboundedSender<GatewayEvent>,
        commands: mpsc::UnboundedReceiver<SimCommand>,
    ) -> Self {
        Self {
            config,
            events,
            commands,
            orders: HashMap::new(),
            routes: HashMap::new(),
            subscribers: Vec::new(),
            next_order_id: 1000,
            next_route_id: 1,
        }
    }

    async fn run(mut self) {
        let heartbeat_period = self.config.heartbeat_interval;
        let mut heartbeat = heartbeat_period.map(tokio::time::interval);

        loop {
            if let Some(interval) = heartbeat.as_mut() {
                tokio::select! {
                    command = self.commands.recv() => match command {
                        Some(command) => self.handle(command).await,
                        None => break,
                    },
                    _ = interval.tick() => self.emit_heartbeats(),
                }
            } else {
                match self.commands.recv().await {
                    Some(command) => self.handle(command).await,
                    None => break,
                }
            }
        }
        tracing::debug!("sim gateway core stopped");
    }

    async fn handle(&mut self, command: SimCommand) {
        match command {
            SimCommand::OpenService(service) => self.open_service(service),
            SimCommand::Request(request, token) => self.handle_request(request, token).await,
            SimCommand::Subscribe(entries) => self.handle_subscribe(entries),
        }
    }

    fn open_service(&mut self, service: String) {
        if service == self.config.service {
            self.emit(GatewayEvent::ServiceStatus(ServiceStatus::Opened {
                service,
            }));
        } else {
            self.emit(GatewayEvent::ServiceStatus(ServiceStatus::OpenFailure {
                service,
                reason: "unknown service".to_string(),
            }));
        }
    }

    async fn handle_request(&mut self, request: GatewayRequest, token: CorrelationToken) {
        match request.operation() {
            "CreateOrder" => self.create_order(&request, token),
            "RouteOrder" => self.route_order(&request, token).await,
            "GroupRoute" => self.group_route(&request, token).await,
            other => self.respond_error(token, 1, &format!("unknown operation {other}")),
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn create_order(&mut self, request: &GatewayRequest, token: CorrelationToken) {
        let root = request.root();
        let Some(ticker) = root.get_value("TICKER").and_then(FieldValue::as_str) else {
            self.respond_error(token, 100, "missing required field TICKER");
            return;
        };
        let Some(amount) = root.get_value("AMOUNT").and_then(FieldValue::as_int) else {
            self.respond_error(token, 100, "missing required field AMOUNT");
            return;
        };
        let side = root
            .get_value("SIDE")
            .and_then(FieldValue::as_str)
            .unwrap_or("BUY");
        let limit_price = root.get_value("LIMIT_PRICE").and_then(FieldValue::as_float);

        let id = self.next_order_id;
        self.next_order_id += 1;

        let row = OrderRow {
            id,
            ticker: ticker.to_string(),
            side: side.to_string(),
            amount,
            status: "NEW".to_string(),
            filled: 0,
            avg_price: 0.0,
            limit_price,
        };
        self.orders.insert(id, row.clone());

        self.respond_success(
            token,
            "CreateOrder",
            FieldMap::from([
                ("ORDER_ID".to_string(), FieldValue::Int(id)),
                ("MESSAGE".to_string(), FieldValue::from("order created")),
            ]),
        );
        self.publish_order(&row, STATUS_NEW);
    }

    async fn route_order(&mut self, request: &GatewayRequest, token: CorrelationToken) {
        let Some(order_id) = request.root().get_value("ORDER_ID").and_then(FieldValue::as_int)
        else {
            self.respond_error(token, 100, "missing required field ORDER_ID");
            return;
        };
        if !self.orders.contains_key(&order_id) {
            self.respond_error(token, 2001, &format!("unknown order {order_id}"));
            return;
        }

        let broker = self.broker_of(request);
        let route_id = self.open_route(order_id, &broker);
        self.respond_success(
            token,
            "RouteOrder",
            FieldMap::from([
                ("ORDER_ID".to_string(), FieldValue::Int(order_id)),
                ("ROUTE_ID".to_string(), FieldValue::Int(route_id)),
                ("MESSAGE".to_string(), FieldValue::from("order routed")),
            ]),
        );
        self.fill_routes(&[route_id]).await;
    }

    async fn group_route(&mut self, request: &GatewayRequest, token: CorrelationToken) {
        let order_ids: Vec<i64> = request
            .root()
            .get_repeated("ORDER_ID")
            .map(|values| values.iter().filter_map(FieldValue::as_int).collect())
            .unwrap_or_default();
        if order_ids.is_empty() {
            self.respond_error(token, 100, "missing required field ORDER_ID");
            return;
        }

        let broker = self.broker_of(request);
        let mut routed = Vec::new();
        let mut failed = 0_i64;
        for order_id in &order_ids {
            if self.orders.contains_key(order_id) {
                routed.push(self.open_route(*order_id, &broker));
            } else {
                failed += 1;
            }
        }

        if routed.is_empty() {
            self.respond_error(token, 2000, "no orders routed");
            return;
        }

        #[allow(clippy::cast_possible_wrap)]
        let routed_count = routed.len() as i64;
        self.respond_success(
            token,
            "GroupRoute",
            FieldMap::from([
                ("ROUTED".to_string(), FieldValue::Int(routed_count)),
                ("FAILED".to_string(), FieldValue::Int(failed)),
                (
                    "MESSAGE".to_string(),
                    FieldValue::from(format!(
                        "{routed_count} of {} orders routed",
                        order_ids.len()
                    )),
                ),
            ]),
        );
        self.fill_routes(&routed).await;
    }

    fn broker_of(&self, request: &GatewayRequest) -> String {
        request
            .root()
            .get_value("BROKER")
            .and_then(FieldValue::as_str)
            .unwrap_or("SIMX")
            .to_string()
    }

    fn open_route(&mut self, order_id: i64, broker: &str) -> i64 {
        let route_id = self.next_route_id;
        self.next_route_id += 1;

        let route = RouteRow {
            route_id,
            order_id,
            broker: broker.to_string(),
            status: "WORKING".to_string(),
            filled: 0,
            avg_price: 0.0,
        };
        self.routes.insert(route_id, route.clone());
        self.publish_route(&route, STATUS_NEW);

        if let Some(order) = self.orders.get_mut(&order_id) {
            order.status = "WORKING".to_string();
            let row = order.clone();
            self.publish_order(&row, STATUS_UPDATE);
        }
        route_id
    }

    // Routed orders fill in two increments: a partial fill, then the
    // remainder.
    async fn fill_routes(&mut self, route_ids: &[i64]) {
        for step in 0..2_u8 {
            if !self.config.fill_delay.is_zero() {
                tokio::time::sleep(self.config.fill_delay).await;
            }
            for route_id in route_ids {
                self.apply_fill(*route_id, step == 1);
            }
        }
    }

    fn apply_fill(&mut self, route_id: i64, complete: bool) {
        let Some(route) = self.routes.get(&route_id) else {
            return;
        };
        let order_id = route.order_id;
        let Some(order) = self.orders.get_mut(&order_id) else {
            return;
        };

        let price = order.limit_price.unwrap_or(100.0);
        order.filled = if complete { order.amount } else { order.amount / 2 };
        order.avg_price = price;
        order.status = if complete { "FILLED" } else { "PARTFILLED" }.to_string();
        let order_row = order.clone();

        if let Some(route) = self.routes.get_mut(&route_id) {
            route.filled = order_row.filled;
            route.avg_price = price;
            route.status = order_row.status.clone();
            let route_row = route.clone();
            self.publish_route(&route_row, STATUS_UPDATE);
        }
        self.publish_order(&order_row, STATUS_UPDATE);
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    fn handle_subscribe(&mut self, entries: Vec<SubscriptionEntry>) {
        for entry in entries {
            let Some(topic) = TopicSpec::parse(&entry.topic) else {
                self.emit_subscription_failure(entry.token, 1, "malformed topic");
                continue;
            };
            if topic.service != self.config.service {
                self.emit_subscription_failure(entry.token, 2, "unknown service");
                continue;
            }
            if topic.stream != "orders" && topic.stream != "routes" {
                self.emit_subscription_failure(
                    entry.token,
                    3,
                    &format!("unknown stream {}", topic.stream),
                );
                continue;
            }

            self.emit(GatewayEvent::SubscriptionStatus {
                token: entry.token,
                status: SubscriptionStatus::Started,
            });

            let subscriber = Subscriber {
                token: entry.token,
                stream: topic.stream.clone(),
                fields: topic.fields,
            };
            self.paint_initial_image(&subscriber);
            self.subscribers.push(subscriber);
        }
    }

    fn paint_initial_image(&self, subscriber: &Subscriber) {
        let rows: Vec<FieldMap> = if subscriber.stream == "orders" {
            let mut orders: Vec<&OrderRow> = self.orders.values().collect();
            orders.sort_by_key(|row| row.id);
            orders.iter().map(|row| Self::order_fields(row)).collect()
        } else {
            let mut routes: Vec<&RouteRow> = self.routes.values().collect();
            routes.sort_by_key(|row| row.route_id);
            routes.iter().map(|row| Self::route_fields(row)).collect()
        };

        for fields in rows {
            self.emit(GatewayEvent::SubscriptionData {
                token: subscriber.token,
                status_code: STATUS_INITIAL_PAINT,
                fields: Self::restrict(fields, &subscriber.fields),
            });
        }
        self.emit(GatewayEvent::SubscriptionData {
            token: subscriber.token,
            status_code: STATUS_INITIAL_PAINT_COMPLETE,
            fields: FieldMap::new(),
        });
    }

    fn emit_heartbeats(&self) {
        for subscriber in &self.subscribers {
            self.emit(GatewayEvent::SubscriptionData {
                token: subscriber.token,
                status_code: STATUS_HEARTBEAT,
                fields: FieldMap::new(),
            });
        }
    }

    fn publish_order(&self, row: &OrderRow, status_code: i32) {
        self.publish("orders", Self::order_fields(row), status_code);
    }

    fn publish_route(&self, row: &RouteRow, status_code: i32) {
        self.publish("routes", Self::route_fields(row), status_code);
    }

    fn publish(&self, stream: &str, fields: FieldMap, status_code: i32) {
        for subscriber in self.subscribers.iter().filter(|s| s.stream == stream) {
            self.emit(GatewayEvent::SubscriptionData {
                token: subscriber.token,
                status_code,
                fields: Self::restrict(fields.clone(), &subscriber.fields),
            });
        }
    }

    fn order_fields(row: &OrderRow) -> FieldMap {
        FieldMap::from([
            ("ORDER_ID".to_string(), FieldValue::Int(row.id)),
            ("TICKER".to_string(), FieldValue::from(row.ticker.clone())),
            ("SIDE".to_string(), FieldValue::from(row.side.clone())),
            ("AMOUNT".to_string(), FieldValue::Int(row.amount)),
            ("STATUS".to_string(), FieldValue::from(row.status.clone())),
            ("FILLED".to_string(), FieldValue::Int(row.filled)),
            ("AVG_PRICE".to_string(), FieldValue::Float(row.avg_price)),
        ])
    }

    fn route_fields(row: &RouteRow) -> FieldMap {
        FieldMap::from([
            ("ROUTE_ID".to_string(), FieldValue::Int(row.route_id)),
            ("ORDER_ID".to_string(), FieldValue::Int(row.order_id)),
            ("BROKER".to_string(), FieldValue::from(row.broker.clone())),
            ("STATUS".to_string(), FieldValue::from(row.status.clone())),
            ("FILLED".to_string(), FieldValue::Int(row.filled)),
            ("AVG_PRICE".to_string(), FieldValue::Float(row.avg_price)),
        ])
    }

    // Subscribers only receive the fields their topic asked for.
    fn restrict(mut fields: FieldMap, requested: &[String]) -> FieldMap {
        fields.retain(|name, _| requested.iter().any(|field| field == name));
        fields
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    fn emit(&self, event: GatewayEvent) {
        // A closed stream means the consumer is gone; the core winds
        // down when the command channel closes.
        let _ = self.events.send(event);
    }

    fn emit_subscription_failure(&self, token: CorrelationToken, code: i32, message: &str) {
        self.emit(GatewayEvent::SubscriptionStatus {
            token,
            status: SubscriptionStatus::Failure {
                code,
                message: message.to_string(),
            },
        });
    }

    fn respond_success(&self, token: CorrelationToken, operation: &str, fields: FieldMap) {
        self.emit(GatewayEvent::Response {
            token,
            partial: false,
            body: ResponseBody::Success {
                operation: operation.to_string(),
                fields,
            },
        });
    }

    fn respond_error(&self, token: CorrelationToken, code: i32, message: &str) {
        self.emit(GatewayEvent::Response {
            token,
            partial: false,
            body: ResponseBody::Error {
                code,
                message: message.to_string(),
            },
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
