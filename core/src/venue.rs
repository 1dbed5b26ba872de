//! The `VenueAdapter` contract and the generic `Exchange<A>` that composes
//! it with the shared framework. Nothing venue-specific lives here; every exchange crate
//! implements `VenueAdapter` and hands an instance to `Exchange::new`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mmb_domain::balance::Balance;
use mmb_domain::candle::Candle;
use mmb_domain::currency::CurrencyPair;
use mmb_domain::error::{ExchangeError, ExchangeErrorKind};
use mmb_domain::fee::TradingFee;
use mmb_domain::market::Market;
use mmb_domain::order::{Order, OrderSide, OrderType};
use mmb_domain::order_book::OrderBook;
use mmb_domain::ticker::Ticker;
use mmb_domain::timeframe::Timeframe;
use mmb_domain::trade::Trade;
use mmb_domain::DateTime;
use rust_decimal::Decimal;
use serde_json::Value;
use url::Url;

use crate::config::ExchangeConfig;
use crate::connectivity::PingMode;
use crate::events::{EventEmitter, ExchangeEvent};
use crate::rest_client::RestClient;
use crate::subscription::{Callback, SubscriptionRegistry};
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Mutually exclusive body-encoding modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    QueryInUrl,
    JsonBody,
    FormBody,
}

/// What `sign` hands back to the pipeline: possibly-mutated params, extra
/// headers, and an optional URL rewrite.
#[derive(Debug, Clone, Default)]
pub struct SignedRequest {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub url_override: Option<String>,
}

/// One canonical operation's venue-specific shape, built by an adapter and
/// executed by `RestClient::request`.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub signed: bool,
    pub weight: f64,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            signed: false,
            weight: 1.0,
        }
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }
}

/// Capability map backing `describe().has`. A typed struct
/// instead of a loose string map so an adapter can't silently drift from
/// what it actually implements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeFeatures {
    pub fetch_ticker: bool,
    pub fetch_tickers: bool,
    pub fetch_order_book: bool,
    pub fetch_trades: bool,
    pub fetch_ohlcv: bool,
    pub create_order: bool,
    pub amend_order: bool,
    pub cancel_order: bool,
    pub cancel_all_orders: bool,
    pub fetch_order: bool,
    pub fetch_open_orders: bool,
    pub fetch_closed_orders: bool,
    pub fetch_my_trades: bool,
    pub fetch_balance: bool,
    pub fetch_trading_fees: bool,
    pub watch_ticker: bool,
    pub watch_order_book: bool,
    pub watch_trades: bool,
    pub watch_klines: bool,
    pub watch_balance: bool,
    pub watch_orders: bool,
}

impl ExchangeFeatures {
    /// Renders the typed map as the dynamic `method -> bool` view callers
    /// expect to probe before calling.
    pub fn has(&self, op: &str) -> bool {
        match op {
            "fetchTicker" => self.fetch_ticker,
            "fetchTickers" => self.fetch_tickers,
            "fetchOrderBook" => self.fetch_order_book,
            "fetchTrades" => self.fetch_trades,
            "fetchOHLCV" => self.fetch_ohlcv,
            "createOrder" => self.create_order,
            "amendOrder" => self.amend_order,
            "cancelOrder" => self.cancel_order,
            "cancelAllOrders" => self.cancel_all_orders,
            "fetchOrder" => self.fetch_order,
            "fetchOpenOrders" => self.fetch_open_orders,
            "fetchClosedOrders" => self.fetch_closed_orders,
            "fetchMyTrades" => self.fetch_my_trades,
            "fetchBalance" => self.fetch_balance,
            "fetchTradingFees" => self.fetch_trading_fees,
            "watchTicker" => self.watch_ticker,
            "watchOrderBook" => self.watch_order_book,
            "watchTrades" => self.watch_trades,
            "watchKlines" => self.watch_klines,
            "watchBalance" => self.watch_balance,
            "watchOrders" => self.watch_orders,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VenueUrls {
    pub rest: String,
    pub rest_sandbox: Option<String>,
    pub ws_public: String,
    pub ws_private: Option<String>,
    pub ws_public_sandbox: Option<String>,
    pub ws_private_sandbox: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitParams {
    pub capacity: u32,
    pub refill: u32,
    pub period: Duration,
}

/// A declarative record of everything that varies across venues but
/// doesn't need a method call to express.
#[derive(Clone)]
pub struct Describe {
    pub id: &'static str,
    pub version: &'static str,
    pub has: ExchangeFeatures,
    pub urls: VenueUrls,
    pub rate_limit: RateLimitParams,
    pub timeframes: HashMap<Timeframe, &'static str>,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

/// Topic-key extraction + demultiplexing outcome for one raw WS frame.
pub enum DemuxOutcome {
    Topic(String, Value),
    Heartbeat,
    Ignore,
}

/// The canonical surface every venue maps onto. Every method
/// has a default that raises `not_implemented` — adapters override only
/// what they support, and must keep `describe().has` in sync.
pub trait VenueAdapter: Send + Sync + 'static {
    fn describe(&self) -> &Describe;

    /// Mutates/extends params, may add headers, may rewrite the URL
    ///.
    fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        params: Vec<(String, String)>,
        config: &ExchangeConfig,
    ) -> Result<SignedRequest, ExchangeError>;

    fn base_url(&self, signed: bool, config: &ExchangeConfig) -> String {
        let urls = &self.describe().urls;
        if config.sandbox {
            if let Some(sandbox) = &urls.rest_sandbox {
                return sandbox.clone();
            }
        }
        urls.rest.clone()
    }

    fn body_encoding(&self, _method: HttpMethod) -> BodyEncoding {
        BodyEncoding::QueryInUrl
    }

    /// Inspects rate-limit headers; default no-op.
    fn on_headers(&self, _headers: &hyper::HeaderMap, _throttle: &Throttle) {}

    /// Classifies a non-2xx HTTP response.
    fn on_http_error(&self, status: u16, body: &str) -> ExchangeError {
        let id = self.describe().id;
        match status {
            401 | 403 => ExchangeError::authentication(id, body),
            404 => ExchangeError::new(ExchangeErrorKind::OrderNotFound, id, None, body),
            500..=599 => ExchangeError::new(ExchangeErrorKind::ExchangeNotAvailable, id, None, body),
            _ => ExchangeError::new(ExchangeErrorKind::Fault, id, None, body),
        }
    }

    /// Unwraps the venue's response envelope.
    fn unwrap_envelope(&self, body: Value) -> Result<Value, ExchangeError>;

    fn to_venue_symbol(&self, symbol: &CurrencyPair) -> String {
        format!("{}{}", symbol.base, symbol.quote)
    }

    /// Heuristic fallback only; `Exchange::from_venue_symbol` tries the
    /// markets-by-id cache first.
    fn venue_symbol_heuristic(&self, venue_id: &str) -> Option<CurrencyPair>;

    fn default_time_in_force(&self) -> mmb_domain::order::TimeInForce {
        mmb_domain::order::TimeInForce::GoodTillCancel
    }

    fn supports_order_type(&self, order_type: OrderType) -> bool {
        order_type == OrderType::Limit || order_type == OrderType::Market
    }

    fn fetch_time_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/time")
    }

    fn parse_time(&self, _body: Value) -> Result<DateTime, ExchangeError> {
        Err(self.not_implemented("fetchTime"))
    }

    fn load_markets_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/markets")
    }

    fn parse_markets(&self, _body: Value) -> Result<Vec<Market>, ExchangeError> {
        Err(self.not_implemented("loadMarkets"))
    }

    fn fetch_ticker_request(&self, _symbol: &Market) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchTicker"))
    }

    fn parse_ticker(&self, _body: Value, _market: &Market) -> Result<Ticker, ExchangeError> {
        Err(self.not_implemented("fetchTicker"))
    }

    fn fetch_order_book_request(
        &self,
        _market: &Market,
        _limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchOrderBook"))
    }

    fn parse_order_book(&self, _body: Value, _market: &Market) -> Result<OrderBook, ExchangeError> {
        Err(self.not_implemented("fetchOrderBook"))
    }

    fn fetch_trades_request(
        &self,
        _market: &Market,
        _since: Option<DateTime>,
        _limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchTrades"))
    }

    fn parse_trades(&self, _body: Value, _market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        Err(self.not_implemented("fetchTrades"))
    }

    fn fetch_ohlcv_request(
        &self,
        _market: &Market,
        _timeframe: Timeframe,
        _since: Option<DateTime>,
        _limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchOHLCV"))
    }

    fn parse_candles(&self, _body: Value) -> Result<Vec<Candle>, ExchangeError> {
        Err(self.not_implemented("fetchOHLCV"))
    }

    #[allow(clippy::too_many_arguments)]
    fn create_order_request(
        &self,
        _market: &Market,
        _order_type: OrderType,
        _side: OrderSide,
        _amount: Decimal,
        _price: Option<Decimal>,
        _params: Value,
        _config: &ExchangeConfig,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("createOrder"))
    }

    fn parse_order(&self, _body: Value, _market: &Market) -> Result<Order, ExchangeError> {
        Err(self.not_implemented("createOrder"))
    }

    fn cancel_order_request(
        &self,
        _id: &str,
        _market: Option<&Market>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("cancelOrder"))
    }

    fn fetch_balance_request(&self) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchBalance"))
    }

    fn parse_balance(&self, _body: Value) -> Result<Balance, ExchangeError> {
        Err(self.not_implemented("fetchBalance"))
    }

    /// Bulk ticker snapshot; `symbols` narrows the request where the venue
    /// supports filtering, otherwise the adapter fetches the full board and
    /// `Exchange::fetch_tickers` filters it down.
    fn fetch_tickers_request(&self, _symbols: &[CurrencyPair]) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchTickers"))
    }

    fn parse_tickers(&self, _body: Value) -> Result<Vec<Ticker>, ExchangeError> {
        Err(self.not_implemented("fetchTickers"))
    }

    fn fetch_order_request(
        &self,
        _id: &str,
        _market: Option<&Market>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchOrder"))
    }

    fn fetch_open_orders_request(&self, _market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchOpenOrders"))
    }

    fn fetch_closed_orders_request(&self, _market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchClosedOrders"))
    }

    /// Parses a list response shared by `fetchOpenOrders`/`fetchClosedOrders`.
    /// `market` is `None` when the venue returned orders across symbols.
    fn parse_orders(&self, _body: Value, _market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        Err(self.not_implemented("fetchOpenOrders"))
    }

    fn fetch_my_trades_request(
        &self,
        _market: Option<&Market>,
        _since: Option<DateTime>,
        _limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchMyTrades"))
    }

    fn parse_my_trades(&self, _body: Value, _market: Option<&Market>) -> Result<Vec<Trade>, ExchangeError> {
        Err(self.not_implemented("fetchMyTrades"))
    }

    /// Only the venues that actually support in-place amend (price/amount
    /// change without cancel-replace) override this.
    fn amend_order_request(
        &self,
        _id: &str,
        _market: &Market,
        _amount: Option<Decimal>,
        _price: Option<Decimal>,
    ) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("amendOrder"))
    }

    fn cancel_all_orders_request(&self, _market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("cancelAllOrders"))
    }

    /// Most venues answer a cancel-all with a list of the orders it
    /// canceled; adapters that don't get one back may return an empty
    /// `Vec` instead of failing the call.
    fn parse_canceled_orders(
        &self,
        _body: Value,
        _market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        Err(self.not_implemented("cancelAllOrders"))
    }

    fn fetch_trading_fees_request(&self, _market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        Err(self.not_implemented("fetchTradingFees"))
    }

    fn parse_trading_fees(
        &self,
        _body: Value,
        _market: Option<&Market>,
    ) -> Result<Vec<TradingFee>, ExchangeError> {
        Err(self.not_implemented("fetchTradingFees"))
    }

    // --- Streaming hooks ---

    fn ws_url(&self, private: bool, config: &ExchangeConfig) -> Result<Url, ExchangeError> {
        let urls = &self.describe().urls;
        let raw = if private {
            if config.sandbox {
                urls.ws_private_sandbox.as_ref().or(urls.ws_private.as_ref())
            } else {
                urls.ws_private.as_ref()
            }
        } else if config.sandbox {
            urls.ws_public_sandbox.as_ref().or(Some(&urls.ws_public))
        } else {
            Some(&urls.ws_public)
        };
        let raw = raw.ok_or_else(|| {
            ExchangeError::bad_request(self.describe().id, "venue has no websocket endpoint")
        })?;
        Url::parse(raw).map_err(|e| ExchangeError::bad_request(self.describe().id, e.to_string()))
    }

    fn ping_mode(&self, _private: bool) -> PingMode {
        PingMode::Protocol
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Builds the signed login/auth frame for private channels, if any
    ///.
    fn auth_frame(&self, _config: &ExchangeConfig) -> Result<Option<String>, ExchangeError> {
        Ok(None)
    }

    /// Releases a venue-specific session resource acquired for private
    /// streaming (e.g. Binance's user-data-stream listenKey), if the venue
    /// has one outstanding. `close_all_ws` runs this best-effort, ignoring
    /// failures — venues with no such resource just return `None`.
    fn close_listen_key_request(&self) -> Option<RequestSpec> {
        None
    }

    fn subscribe_frame(&self, topic: &str) -> String {
        serde_json::json!({ "op": "subscribe", "args": [topic] }).to_string()
    }

    /// Names the topic key for a canonical channel + optional symbol, the
    /// value `demux` is expected to recover from each frame.
    fn topic_for(&self, channel: &str, symbol: Option<&CurrencyPair>) -> String {
        match symbol {
            Some(symbol) => format!("{channel}:{}", self.to_venue_symbol(symbol)),
            None => channel.to_owned(),
        }
    }

    /// Extracts `(topic, payload)` from one raw frame, or flags it as a
    /// heartbeat/ignorable control message.
    fn demux(&self, frame: &crate::connectivity::WsFrame) -> DemuxOutcome {
        let text = match frame {
            crate::connectivity::WsFrame::Text(t) => t.clone(),
            crate::connectivity::WsFrame::Binary(_) => return DemuxOutcome::Ignore,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return DemuxOutcome::Ignore;
        };
        match value.get("topic").or_else(|| value.get("channel")).and_then(Value::as_str) {
            Some(topic) => DemuxOutcome::Topic(topic.to_owned(), value),
            None => DemuxOutcome::Ignore,
        }
    }

    fn not_implemented(&self, operation: &str) -> ExchangeError {
        ExchangeError::not_implemented(self.describe().id, operation)
    }
}

/// Composes a `VenueAdapter` with the shared throttler, markets cache, HTTP
/// pipeline, websocket subscription registry, and event stream.
pub struct Exchange<A: VenueAdapter> {
    pub adapter: Arc<A>,
    pub config: ExchangeConfig,
    throttle: Arc<Throttle>,
    rest: RestClient,
    markets_by_symbol: DashMap<CurrencyPair, Arc<Market>>,
    markets_by_id: DashMap<String, Arc<Market>>,
    pub subscriptions: SubscriptionRegistry,
    pub events: Arc<EventEmitter>,
}

impl<A: VenueAdapter> Exchange<A> {
    pub fn new(adapter: A, config: ExchangeConfig) -> Self {
        let rl = adapter.describe().rate_limit;
        let throttle = Throttle::new(rl.capacity, rl.refill, rl.period);
        Self {
            adapter: Arc::new(adapter),
            rest: RestClient::new(),
            throttle,
            config,
            markets_by_symbol: DashMap::new(),
            markets_by_id: DashMap::new(),
            subscriptions: SubscriptionRegistry::default(),
            events: Arc::new(EventEmitter::default()),
        }
    }

    pub fn id(&self) -> &'static str {
        self.adapter.describe().id
    }

    fn require_credentials(&self) -> Result<(), ExchangeError> {
        if !self.config.has_credentials() {
            return Err(ExchangeError::authentication(
                self.id(),
                "missing api_key/secret",
            ));
        }
        Ok(())
    }

    async fn execute(&self, spec: RequestSpec) -> Result<Value, ExchangeError> {
        if spec.signed {
            self.require_credentials()?;
        }
        if self.config.enable_rate_limit {
            self.throttle.consume(spec.weight).await;
        }
        self.rest
            .request(self.adapter.as_ref(), &self.config, &self.throttle, self.events.clone(), spec)
            .await
    }

    /// Escape hatch for adapter-specific endpoints the canonical surface
    /// doesn't cover (e.g. Binance's listenKey lifecycle) — runs any
    /// `RequestSpec` through the same throttle/sign/dispatch pipeline.
    pub async fn raw_request(&self, spec: RequestSpec) -> Result<Value, ExchangeError> {
        self.execute(spec).await
    }

    pub async fn fetch_time(&self) -> Result<DateTime, ExchangeError> {
        let spec = self.adapter.fetch_time_request();
        let body = self.execute(spec).await?;
        self.adapter.parse_time(body)
    }

    pub async fn load_markets(&self, reload: bool) -> Result<(), ExchangeError> {
        if !reload && !self.markets_by_symbol.is_empty() {
            return Ok(());
        }
        let spec = self.adapter.load_markets_request();
        let body = self.execute(spec).await?;
        let markets = self.adapter.parse_markets(body)?;
        self.markets_by_symbol.clear();
        self.markets_by_id.clear();
        for market in markets {
            let market = Arc::new(market);
            self.markets_by_symbol.insert(market.symbol.clone(), market.clone());
            self.markets_by_id.insert(market.venue_id.clone(), market);
        }
        Ok(())
    }

    pub fn market(&self, symbol: &CurrencyPair) -> Result<Arc<Market>, ExchangeError> {
        self.markets_by_symbol
            .get(symbol)
            .map(|m| m.value().clone())
            .ok_or_else(|| ExchangeError::bad_symbol(self.id(), symbol.to_string()))
    }

    /// `fromVenueSymbol`: markets-by-id lookup first, heuristic
    /// fallback only when the id isn't indexed yet.
    pub fn from_venue_symbol(&self, venue_id: &str) -> Option<CurrencyPair> {
        if let Some(market) = self.markets_by_id.get(venue_id) {
            return Some(market.symbol.clone());
        }
        self.adapter.venue_symbol_heuristic(venue_id)
    }

    pub async fn fetch_ticker(&self, symbol: &CurrencyPair) -> Result<Ticker, ExchangeError> {
        let market = self.market(symbol)?;
        let spec = self.adapter.fetch_ticker_request(&market)?;
        let body = self.execute(spec).await?;
        let mut ticker = self.adapter.parse_ticker(body, &market)?;
        ticker.fill_derived_fields();
        Ok(ticker)
    }

    pub async fn fetch_order_book(
        &self,
        symbol: &CurrencyPair,
        limit: Option<u32>,
    ) -> Result<OrderBook, ExchangeError> {
        let market = self.market(symbol)?;
        let spec = self.adapter.fetch_order_book_request(&market, limit)?;
        let body = self.execute(spec).await?;
        self.adapter.parse_order_book(body, &market)
    }

    pub async fn fetch_trades(
        &self,
        symbol: &CurrencyPair,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let market = self.market(symbol)?;
        let spec = self.adapter.fetch_trades_request(&market, since, limit)?;
        let body = self.execute(spec).await?;
        self.adapter.parse_trades(body, &market)
    }

    pub async fn fetch_ohlcv(
        &self,
        symbol: &CurrencyPair,
        timeframe: Timeframe,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let market = self.market(symbol)?;
        let spec = self
            .adapter
            .fetch_ohlcv_request(&market, timeframe, since, limit)?;
        let body = self.execute(spec).await?;
        let candles = self.adapter.parse_candles(body)?;
        Ok(mmb_domain::candle::sort_chronological(candles, timeframe))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_order(
        &self,
        symbol: &CurrencyPair,
        order_type: OrderType,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        params: Value,
    ) -> Result<Order, ExchangeError> {
        if !self.adapter.supports_order_type(order_type) {
            return Err(ExchangeError::invalid_order(
                self.id(),
                format!("{} does not support order type {order_type:?}", self.id()),
            ));
        }
        if order_type == OrderType::Limit && price.is_none() {
            return Err(ExchangeError::bad_request(self.id(), "LIMIT order requires a price"));
        }
        let market = self.market(symbol)?;
        let spec = self
            .adapter
            .create_order_request(&market, order_type, side, amount, price, params, &self.config)?;
        let body = self.execute(spec).await?;
        let order = self.adapter.parse_order(body, &market)?;
        order.check_invariant()?;
        Ok(order)
    }

    pub async fn create_limit_order(
        &self,
        symbol: &CurrencyPair,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Result<Order, ExchangeError> {
        self.create_order(symbol, OrderType::Limit, side, amount, Some(price), Value::Null)
            .await
    }

    pub async fn create_market_order(
        &self,
        symbol: &CurrencyPair,
        side: OrderSide,
        amount: Decimal,
    ) -> Result<Order, ExchangeError> {
        self.create_order(symbol, OrderType::Market, side, amount, None, Value::Null)
            .await
    }

    pub async fn cancel_order(
        &self,
        id: &str,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Order, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.cancel_order_request(id, market.as_deref())?;
        let body = self.execute(spec).await?;
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.id(), "symbol required"))?;
        self.adapter.parse_order(body, &market)
    }

    pub async fn fetch_balance(&self) -> Result<Balance, ExchangeError> {
        let spec = self.adapter.fetch_balance_request()?;
        let body = self.execute(spec).await?;
        self.adapter.parse_balance(body)
    }

    /// `symbols` empty means "every market the venue will return in one
    /// shot"; non-empty narrows the request where the adapter supports it.
    pub async fn fetch_tickers(&self, symbols: &[CurrencyPair]) -> Result<Vec<Ticker>, ExchangeError> {
        let spec = self.adapter.fetch_tickers_request(symbols)?;
        let body = self.execute(spec).await?;
        let mut tickers = self.adapter.parse_tickers(body)?;
        for ticker in &mut tickers {
            ticker.fill_derived_fields();
        }
        Ok(tickers)
    }

    pub async fn fetch_order(
        &self,
        id: &str,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Order, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.fetch_order_request(id, market.as_deref())?;
        let body = self.execute(spec).await?;
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.id(), "symbol required"))?;
        self.adapter.parse_order(body, &market)
    }

    pub async fn fetch_open_orders(
        &self,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.fetch_open_orders_request(market.as_deref())?;
        let body = self.execute(spec).await?;
        self.adapter.parse_orders(body, market.as_deref())
    }

    pub async fn fetch_closed_orders(
        &self,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.fetch_closed_orders_request(market.as_deref())?;
        let body = self.execute(spec).await?;
        self.adapter.parse_orders(body, market.as_deref())
    }

    pub async fn fetch_my_trades(
        &self,
        symbol: Option<&CurrencyPair>,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.fetch_my_trades_request(market.as_deref(), since, limit)?;
        let body = self.execute(spec).await?;
        self.adapter.parse_my_trades(body, market.as_deref())
    }

    pub async fn amend_order(
        &self,
        id: &str,
        symbol: &CurrencyPair,
        amount: Option<Decimal>,
        price: Option<Decimal>,
    ) -> Result<Order, ExchangeError> {
        let market = self.market(symbol)?;
        let spec = self.adapter.amend_order_request(id, &market, amount, price)?;
        let body = self.execute(spec).await?;
        self.adapter.parse_order(body, &market)
    }

    pub async fn cancel_all_orders(
        &self,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.cancel_all_orders_request(market.as_deref())?;
        let body = self.execute(spec).await?;
        self.adapter.parse_canceled_orders(body, market.as_deref())
    }

    pub async fn fetch_trading_fees(
        &self,
        symbol: Option<&CurrencyPair>,
    ) -> Result<Vec<TradingFee>, ExchangeError> {
        let market = symbol.map(|s| self.market(s)).transpose()?;
        let spec = self.adapter.fetch_trading_fees_request(market.as_deref())?;
        let body = self.execute(spec).await?;
        self.adapter.parse_trading_fees(body, market.as_deref())
    }

    /// Releases every websocket client, pending ping timers, the
    /// private-auth flag, and the subscription registry. Also tears down
    /// any venue-specific listen key on a best-effort basis, ignoring
    /// failures. Safe to call more than once.
    pub async fn close_all_ws(&self) {
        if let Some(spec) = self.adapter.close_listen_key_request() {
            let _ = self.execute(spec).await;
        }
        self.subscriptions.close_all();
    }

    async fn watch(
        &self,
        channel: &str,
        symbol: Option<&CurrencyPair>,
        private: bool,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        if private {
            self.require_credentials()?;
        }
        let topic = self.adapter.topic_for(channel, symbol);
        self.subscriptions
            .subscribe(self.adapter.clone(), &self.config, self.events.clone(), private, topic, callback)
            .await
    }

    pub async fn watch_ticker(
        &self,
        symbol: &CurrencyPair,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        self.watch("ticker", Some(symbol), false, callback).await
    }

    pub async fn watch_order_book(
        &self,
        symbol: &CurrencyPair,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        self.watch("orderbook", Some(symbol), false, callback).await
    }

    pub async fn watch_trades(
        &self,
        symbol: &CurrencyPair,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        self.watch("trades", Some(symbol), false, callback).await
    }

    pub async fn watch_klines(
        &self,
        symbol: &CurrencyPair,
        timeframe: Timeframe,
        callback: Callback,
    ) -> Result<(), ExchangeError> {
        self.watch(&format!("klines:{}", timeframe.code()), Some(symbol), false, callback)
            .await
    }

    pub async fn watch_balance(&self, callback: Callback) -> Result<(), ExchangeError> {
        self.watch("balance", None, true, callback).await
    }

    pub async fn watch_orders(&self, callback: Callback) -> Result<(), ExchangeError> {
        self.watch("orders", None, true, callback).await
    }
}

impl<A: VenueAdapter> Drop for Exchange<A> {
    fn drop(&mut self) {
        if !self.subscriptions.is_empty() {
            log::warn!(
                "{} dropped with open websocket subscriptions; call close_all_ws().await before dropping",
                self.id()
            );
        }
    }
}

pub(crate) fn emit_rate_limit_warning(events: &EventEmitter, used: f64, limit: f64) {
    events.emit(ExchangeEvent::RateLimitWarning {
        used,
        limit,
        remaining: (limit - used).max(0.0),
        reset_timestamp: None,
    });
}
