//! `VenueAdapter` for Binance spot.
//!
//! Signing is the classic B2 family: HMAC-SHA256 hex over the fully
//! assembled query string (existing params, then `timestamp`, then
//! `recvWindow`), with the key carried in `X-MBX-APIKEY` rather than in
//! the signed payload. `/api/v3/userDataStream` is the one documented
//! exception — it only needs the header, no HMAC — handled inline in
//! `sign` rather than bolting a second signing variant onto the pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mmb_core::config::ExchangeConfig;
use mmb_core::connectivity::WsFrame;
use mmb_core::signing::hmac_sha256_hex;
use mmb_core::venue::{
    BodyEncoding, Describe, DemuxOutcome, ExchangeFeatures, HttpMethod, RateLimitParams,
    RequestSpec, SignedRequest, VenueAdapter, VenueUrls,
};
use mmb_domain::balance::{Balance, BalanceAmounts};
use mmb_domain::candle::Candle;
use mmb_domain::currency::{CurrencyCode, CurrencyPair};
use mmb_domain::error::{ExchangeError, ExchangeErrorKind};
use mmb_domain::fee::TradingFee;
use mmb_domain::market::Market;
use mmb_domain::order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
use mmb_domain::order_book::{Level, OrderBook, OrderBookEventType};
use mmb_domain::ticker::Ticker;
use mmb_domain::timeframe::Timeframe;
use mmb_domain::trade::{Trade, TradeSide};
use mmb_domain::DateTime;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use url::Url;

const RECV_WINDOW_MS: u64 = 5000;
const LISTEN_KEY_PATH: &str = "/api/v3/userDataStream";
/// Binance documents a 60-minute expiry; refresh at less than half that.
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(25 * 60);

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn millis_to_datetime(ms: i64) -> DateTime {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Binance venue codes folded into the closed error taxonomy.
fn classify_code(code: i64, message: &str) -> ExchangeErrorKind {
    match code {
        -2010 => ExchangeErrorKind::InsufficientFunds,
        -2011 | -2013 => ExchangeErrorKind::OrderNotFound,
        -1121 => ExchangeErrorKind::BadSymbol,
        -1013 => ExchangeErrorKind::InvalidOrder,
        _ if message.contains("Filter failure") || message.contains("Invalid quantity") => {
            ExchangeErrorKind::InvalidOrder
        }
        _ if message.contains("Too many requests") => ExchangeErrorKind::RateLimitExceeded,
        _ => ExchangeErrorKind::Fault,
    }
}

pub struct BinanceAdapter {
    describe: Describe,
    listen_key: Mutex<Option<String>>,
    next_request_id: AtomicU64,
}

impl BinanceAdapter {
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        let mut timeframes = HashMap::new();
        timeframes.insert(Timeframe::Second1, "1s");
        timeframes.insert(Timeframe::Minute1, "1m");
        timeframes.insert(Timeframe::Minute3, "3m");
        timeframes.insert(Timeframe::Minute5, "5m");
        timeframes.insert(Timeframe::Minute15, "15m");
        timeframes.insert(Timeframe::Minute30, "30m");
        timeframes.insert(Timeframe::Hour1, "1h");
        timeframes.insert(Timeframe::Hour2, "2h");
        timeframes.insert(Timeframe::Hour4, "4h");
        timeframes.insert(Timeframe::Hour6, "6h");
        timeframes.insert(Timeframe::Hour8, "8h");
        timeframes.insert(Timeframe::Hour12, "12h");
        timeframes.insert(Timeframe::Day1, "1d");
        timeframes.insert(Timeframe::Day3, "3d");
        timeframes.insert(Timeframe::Week1, "1w");
        timeframes.insert(Timeframe::Month1, "1M");

        let describe = Describe {
            id: "binance",
            version: "v3",
            has: ExchangeFeatures {
                fetch_ticker: true,
                fetch_tickers: true,
                fetch_order_book: true,
                fetch_trades: true,
                fetch_ohlcv: true,
                create_order: true,
                cancel_order: true,
                cancel_all_orders: true,
                fetch_order: true,
                fetch_open_orders: true,
                fetch_closed_orders: true,
                fetch_my_trades: true,
                fetch_balance: true,
                fetch_trading_fees: true,
                watch_ticker: true,
                watch_order_book: true,
                watch_trades: true,
                watch_klines: true,
                watch_balance: true,
                watch_orders: true,
                ..ExchangeFeatures::default()
            },
            urls: VenueUrls {
                rest: "https://api.binance.com".to_owned(),
                rest_sandbox: Some("https://testnet.binance.vision".to_owned()),
                ws_public: "wss://stream.binance.com:9443/stream".to_owned(),
                ws_private: None,
                ws_public_sandbox: Some("wss://testnet.binance.vision/stream".to_owned()),
                ws_private_sandbox: None,
            },
            rate_limit: RateLimitParams {
                capacity: 1200,
                refill: 1200,
                period: Duration::from_secs(60),
            },
            timeframes,
            maker_fee,
            taker_fee,
        };

        Self {
            describe,
            listen_key: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn bad_body(&self, field: &str) -> ExchangeError {
        ExchangeError::bad_request(self.describe.id, format!("response missing or malformed '{field}'"))
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Request to open a user-data-stream listenKey. The embedder runs this through `Exchange::raw_request`
    /// once, then `store_listen_key`, before the first `watch_balance`/
    /// `watch_orders`, and re-runs `keep_alive_listen_key_request` on
    /// `listen_key_keepalive_interval()`.
    pub fn listen_key_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Post, LISTEN_KEY_PATH).signed()
    }

    pub fn keep_alive_listen_key_request(&self, key: &str) -> RequestSpec {
        RequestSpec::new(HttpMethod::Put, LISTEN_KEY_PATH)
            .signed()
            .param("listenKey", key)
    }

    pub fn parse_listen_key(&self, body: &Value) -> Result<String, ExchangeError> {
        body.get("listenKey")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| self.bad_body("listenKey"))
    }

    pub fn store_listen_key(&self, key: String) {
        *self.listen_key.lock() = Some(key);
    }

    pub fn listen_key_keepalive_interval(&self) -> Duration {
        LISTEN_KEY_KEEPALIVE
    }

    /// Shared by `parse_order`, `parse_orders`, and `parse_canceled_orders`:
    /// every one of those is the same Binance order JSON shape, just
    /// reached through different endpoints.
    fn order_from_value(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        let text = |key: &str| body.get(key).and_then(Value::as_str);
        let dec = |key: &str| text(key).and_then(|s| s.parse::<Decimal>().ok());

        let side = if text("side") == Some("SELL") { OrderSide::Sell } else { OrderSide::Buy };
        let order_type = match text("type") {
            Some("MARKET") => OrderType::Market,
            Some("STOP_LOSS_LIMIT") => OrderType::StopLimit,
            Some("LIMIT_MAKER") => OrderType::LimitMaker,
            _ => OrderType::Limit,
        };
        let status = match text("status") {
            Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
            Some("FILLED") => OrderStatus::Filled,
            Some("CANCELED") => OrderStatus::Canceled,
            Some("REJECTED") => OrderStatus::Rejected,
            Some("EXPIRED") => OrderStatus::Expired,
            _ => OrderStatus::New,
        };
        let time_in_force = text("timeInForce").map(|s| match s {
            "IOC" => TimeInForce::ImmediateOrCancel,
            "FOK" => TimeInForce::FillOrKill,
            _ => TimeInForce::GoodTillCancel,
        });
        let ts = body.get("transactTime").or_else(|| body.get("time")).or_else(|| body.get("updateTime")).and_then(Value::as_i64).unwrap_or(0);

        Ok(Order {
            venue_id: body.get("orderId").map(|v| v.to_string()).unwrap_or_default(),
            client_order_id: text("clientOrderId").map(str::to_owned),
            symbol: market.symbol.clone(),
            side,
            order_type,
            time_in_force,
            status,
            price: dec("price"),
            amount: dec("origQty").unwrap_or_default(),
            filled: dec("executedQty").unwrap_or_default(),
            cost: dec("cummulativeQuoteQty"),
            timestamp: millis_to_datetime(ts),
            fee: None,
            trades: None,
            info: body,
        })
    }
}

impl VenueAdapter for BinanceAdapter {
    fn describe(&self) -> &Describe {
        &self.describe
    }

    fn sign(
        &self,
        path: &str,
        _method: HttpMethod,
        mut params: Vec<(String, String)>,
        config: &ExchangeConfig,
    ) -> Result<SignedRequest, ExchangeError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let headers = vec![("X-MBX-APIKEY".to_owned(), api_key)];

        if path == LISTEN_KEY_PATH {
            return Ok(SignedRequest { params, headers, url_override: None });
        }

        let secret = config
            .secret
            .clone()
            .ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;
        let timestamp = mmb_utils::time::get_current_milliseconds();
        params.push(("timestamp".to_owned(), timestamp.to_string()));
        params.push(("recvWindow".to_owned(), RECV_WINDOW_MS.to_string()));
        let signature = hmac_sha256_hex(secret.as_bytes(), encode_query(&params).as_bytes());
        params.push(("signature".to_owned(), signature));

        Ok(SignedRequest { params, headers, url_override: None })
    }

    fn body_encoding(&self, _method: HttpMethod) -> BodyEncoding {
        BodyEncoding::QueryInUrl
    }

    fn on_http_error(&self, status: u16, body: &str) -> ExchangeError {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(code) = value.get("code").and_then(Value::as_i64) {
                let message = value.get("msg").and_then(Value::as_str).unwrap_or(body).to_owned();
                return ExchangeError::new(classify_code(code, &message), self.describe.id, Some(code), message);
            }
        }
        match status {
            401 | 403 => ExchangeError::authentication(self.describe.id, body),
            404 => ExchangeError::new(ExchangeErrorKind::OrderNotFound, self.describe.id, None, body),
            500..=599 => {
                ExchangeError::new(ExchangeErrorKind::ExchangeNotAvailable, self.describe.id, None, body)
            }
            _ => ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, body),
        }
    }

    /// Binance sometimes answers with HTTP 200 and an
    /// embedded `{"code":..,"msg":..}` error envelope instead of a non-2xx
    /// status, so the error has to be caught here too, not just in
    /// `on_http_error`.
    fn unwrap_envelope(&self, body: Value) -> Result<Value, ExchangeError> {
        if let Some(code) = body.get("code").and_then(Value::as_i64) {
            let message = body.get("msg").and_then(Value::as_str).unwrap_or_default().to_owned();
            return Err(ExchangeError::new(classify_code(code, &message), self.describe.id, Some(code), message));
        }
        Ok(body)
    }

    fn venue_symbol_heuristic(&self, venue_id: &str) -> Option<CurrencyPair> {
        const QUOTES: &[&str] = &["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB", "TRY", "EUR"];
        for quote in QUOTES {
            if let Some(base) = venue_id.strip_suffix(quote) {
                if !base.is_empty() {
                    return Some(CurrencyPair::new(base, *quote));
                }
            }
        }
        None
    }

    fn supports_order_type(&self, order_type: OrderType) -> bool {
        matches!(
            order_type,
            OrderType::Limit | OrderType::Market | OrderType::StopLimit | OrderType::LimitMaker
        )
    }

    fn fetch_time_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/api/v3/time")
    }

    fn parse_time(&self, body: Value) -> Result<DateTime, ExchangeError> {
        let ms = body.get("serverTime").and_then(Value::as_i64).ok_or_else(|| self.bad_body("serverTime"))?;
        Ok(millis_to_datetime(ms))
    }

    fn load_markets_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/api/v3/exchangeInfo")
    }

    fn parse_markets(&self, body: Value) -> Result<Vec<Market>, ExchangeError> {
        let symbols = body.get("symbols").and_then(Value::as_array).ok_or_else(|| self.bad_body("symbols"))?;
        let mut markets = Vec::with_capacity(symbols.len());
        for entry in symbols {
            let venue_id = entry.get("symbol").and_then(Value::as_str).unwrap_or_default();
            let base = entry.get("baseAsset").and_then(Value::as_str).unwrap_or_default();
            let quote = entry.get("quoteAsset").and_then(Value::as_str).unwrap_or_default();
            if venue_id.is_empty() || base.is_empty() || quote.is_empty() {
                continue;
            }
            let mut market = Market::new(venue_id, CurrencyPair::new(base, quote), entry.clone());
            market.active = entry.get("status").and_then(Value::as_str) == Some("TRADING");
            if let Some(filters) = entry.get("filters").and_then(Value::as_array) {
                for filter in filters {
                    match filter.get("filterType").and_then(Value::as_str) {
                        Some("PRICE_FILTER") => {
                            if let Some(tick) =
                                filter.get("tickSize").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok())
                            {
                                let tick = tick.normalize();
                                market.precision.price = Some(tick.scale());
                                market.price_tick = Some(tick);
                            }
                        }
                        Some("LOT_SIZE") => {
                            if let Some(step) =
                                filter.get("stepSize").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok())
                            {
                                let step = step.normalize();
                                market.precision.amount = Some(step.scale());
                                market.amount_step = Some(step);
                            }
                        }
                        _ => {}
                    }
                }
            }
            markets.push(market);
        }
        Ok(markets)
    }

    fn fetch_ticker_request(&self, market: &Market) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v3/ticker/24hr").param("symbol", &market.venue_id))
    }

    fn parse_ticker(&self, body: Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let dec = |key: &str| body.get(key).and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok());
        Ok(Ticker {
            symbol: Some(market.symbol.clone()),
            last: dec("lastPrice"),
            bid: dec("bidPrice"),
            bid_volume: dec("bidQty"),
            ask: dec("askPrice"),
            ask_volume: dec("askQty"),
            high: dec("highPrice"),
            low: dec("lowPrice"),
            open: dec("openPrice"),
            close: dec("lastPrice"),
            base_volume: dec("volume"),
            quote_volume: dec("quoteVolume"),
            change: dec("priceChange"),
            percentage: dec("priceChangePercent"),
            vwap: dec("weightedAvgPrice"),
            timestamp_ms: body.get("closeTime").and_then(Value::as_i64),
        })
    }

    fn fetch_order_book_request(&self, market: &Market, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v3/depth").param("symbol", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_order_book(&self, body: Value, market: &Market) -> Result<OrderBook, ExchangeError> {
        let parse_side = |rows: &[Value]| -> Vec<Level> {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let price = row.first()?.as_str()?.parse::<Decimal>().ok()?;
                    let amount = row.get(1)?.as_str()?.parse::<Decimal>().ok()?;
                    (!amount.is_zero()).then_some(Level { price, amount })
                })
                .collect()
        };
        let bids = body.get("bids").and_then(Value::as_array).ok_or_else(|| self.bad_body("bids"))?;
        let asks = body.get("asks").and_then(Value::as_array).ok_or_else(|| self.bad_body("asks"))?;
        let nonce = body.get("lastUpdateId").and_then(Value::as_u64);

        let mut book = OrderBook::from_levels(
            market.symbol.clone(),
            parse_side(bids),
            parse_side(asks),
            OrderBookEventType::Snapshot,
        )
        .map_err(|e| ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, format!("{e:?}")))?;
        book.nonce = nonce;
        Ok(book)
    }

    fn fetch_trades_request(
        &self,
        market: &Market,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v3/aggTrades").param("symbol", &market.venue_id);
        if let Some(since) = since {
            spec = spec.param("startTime", since.timestamp_millis());
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_trades(&self, body: Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("trades"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row
                .get("p")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.bad_body("p"))?;
            let amount = row
                .get("q")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.bad_body("q"))?;
            let ts = row.get("T").and_then(Value::as_i64).ok_or_else(|| self.bad_body("T"))?;
            let is_buyer_maker = row.get("m").and_then(Value::as_bool).unwrap_or(false);
            trades.push(Trade {
                venue_id: row.get("a").map(|v| v.to_string()).unwrap_or_default(),
                symbol: market.symbol.clone(),
                side: if is_buyer_maker { TradeSide::Sell } else { TradeSide::Buy },
                price,
                amount,
                timestamp: millis_to_datetime(ts),
                order_id: None,
                fee: None,
                fee_currency: None,
                is_maker: Some(is_buyer_maker),
            });
        }
        Ok(trades)
    }

    fn fetch_ohlcv_request(
        &self,
        market: &Market,
        timeframe: Timeframe,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let interval = self
            .describe
            .timeframes
            .get(&timeframe)
            .copied()
            .ok_or_else(|| ExchangeError::bad_request(self.describe.id, format!("unsupported timeframe {timeframe}")))?;
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v3/klines")
            .param("symbol", &market.venue_id)
            .param("interval", interval);
        if let Some(since) = since {
            spec = spec.param("startTime", since.timestamp_millis());
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_candles(&self, body: Value) -> Result<Vec<Candle>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("klines"))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row.as_array().ok_or_else(|| self.bad_body("kline row"))?;
            let field = |i: usize| -> Result<Decimal, ExchangeError> {
                row.get(i)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| self.bad_body("kline field"))
            };
            let ts = row.first().and_then(Value::as_i64).ok_or_else(|| self.bad_body("openTime"))?;
            candles.push(Candle {
                timestamp: millis_to_datetime(ts),
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            });
        }
        Ok(candles)
    }

    fn create_order_request(
        &self,
        market: &Market,
        order_type: OrderType,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        params: Value,
        _config: &ExchangeConfig,
    ) -> Result<RequestSpec, ExchangeError> {
        let venue_type = match order_type {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLimit => "STOP_LOSS_LIMIT",
            OrderType::LimitMaker => "LIMIT_MAKER",
            other => {
                return Err(ExchangeError::invalid_order(
                    self.describe.id,
                    format!("binance does not support order type {other:?}"),
                ))
            }
        };

        let mut spec = RequestSpec::new(HttpMethod::Post, "/api/v3/order")
            .signed()
            .param("symbol", &market.venue_id)
            .param("side", if side == OrderSide::Buy { "BUY" } else { "SELL" })
            .param("type", venue_type)
            .param("quantity", amount);

        if matches!(order_type, OrderType::Limit | OrderType::StopLimit | OrderType::LimitMaker) {
            let price = price.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "LIMIT order requires a price"))?;
            spec = spec.param("price", price).param("timeInForce", "GTC");
        }
        if let Some(client_id) = params.get("clientOrderId").and_then(Value::as_str) {
            spec = spec.param("newClientOrderId", client_id);
        }
        Ok(spec)
    }

    fn parse_order(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        self.order_from_value(body, market)
    }

    fn cancel_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "symbol required to cancel on binance"))?;
        Ok(RequestSpec::new(HttpMethod::Delete, "/api/v3/order")
            .signed()
            .param("symbol", &market.venue_id)
            .param("orderId", id))
    }

    fn fetch_balance_request(&self) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v3/account").signed())
    }

    fn parse_balance(&self, body: Value) -> Result<Balance, ExchangeError> {
        let mut balance = Balance::new(self.describe.id);
        if let Some(rows) = body.get("balances").and_then(Value::as_array) {
            for row in rows {
                let Some(asset) = row.get("asset").and_then(Value::as_str) else { continue };
                let free = row.get("free").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default();
                let used = row.get("locked").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default();
                if free == Decimal::ZERO && used == Decimal::ZERO {
                    continue;
                }
                balance.by_currency.insert(CurrencyCode::new(asset), BalanceAmounts { free, used });
            }
        }
        balance.info = body;
        Ok(balance)
    }

    fn fetch_tickers_request(&self, _symbols: &[CurrencyPair]) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v3/ticker/24hr").weight(40.0))
    }

    fn parse_tickers(&self, body: Value) -> Result<Vec<Ticker>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("tickers"))?;
        let mut tickers = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(venue_id) = row.get("symbol").and_then(Value::as_str) else { continue };
            let symbol = self
                .venue_symbol_heuristic(venue_id)
                .ok_or_else(|| ExchangeError::bad_symbol(self.describe.id, venue_id))?;
            let market = Market::new(venue_id, symbol, Value::Null);
            tickers.push(self.parse_ticker(row.clone(), &market)?);
        }
        Ok(tickers)
    }

    fn fetch_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "symbol required to fetch an order on binance"))?;
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v3/order")
            .signed()
            .param("symbol", &market.venue_id)
            .param("orderId", id))
    }

    fn fetch_open_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v3/openOrders").signed();
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        } else {
            spec = spec.weight(40.0);
        }
        Ok(spec)
    }

    fn fetch_closed_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| {
            ExchangeError::bad_request(self.describe.id, "symbol required to list historical orders on binance")
        })?;
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v3/allOrders")
            .signed()
            .param("symbol", &market.venue_id))
    }

    /// Shared by `fetchOpenOrders`/`fetchClosedOrders`: `/api/v3/allOrders`
    /// returns every order regardless of status, so closed-ness is filtered
    /// here rather than on the wire.
    fn parse_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("orders"))?;
        rows.iter()
            .map(|row| {
                let symbol = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
                let row_market = match market {
                    Some(market) => market.clone(),
                    None => {
                        let pair = self
                            .venue_symbol_heuristic(symbol)
                            .ok_or_else(|| ExchangeError::bad_symbol(self.describe.id, symbol))?;
                        Market::new(symbol, pair, Value::Null)
                    }
                };
                self.order_from_value(row.clone(), &row_market)
            })
            .collect()
    }

    fn fetch_my_trades_request(
        &self,
        market: Option<&Market>,
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "symbol required to fetch fills on binance"))?;
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v3/myTrades")
            .signed()
            .param("symbol", &market.venue_id);
        if let Some(since) = since {
            spec = spec.param("startTime", since.timestamp_millis());
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_my_trades(&self, body: Value, market: Option<&Market>) -> Result<Vec<Trade>, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "symbol required to fetch fills on binance"))?;
        let rows = body.as_array().ok_or_else(|| self.bad_body("trades"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row.get("price").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("price"))?;
            let amount = row.get("qty").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("qty"))?;
            let ts = row.get("time").and_then(Value::as_i64).ok_or_else(|| self.bad_body("time"))?;
            let is_maker = row.get("isMaker").and_then(Value::as_bool).unwrap_or(false);
            trades.push(Trade {
                venue_id: row.get("id").map(|v| v.to_string()).unwrap_or_default(),
                symbol: market.symbol.clone(),
                side: if row.get("isBuyer").and_then(Value::as_bool).unwrap_or(false) { TradeSide::Buy } else { TradeSide::Sell },
                price,
                amount,
                timestamp: millis_to_datetime(ts),
                order_id: row.get("orderId").map(|v| v.to_string()),
                fee: row.get("commission").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                fee_currency: row.get("commissionAsset").and_then(Value::as_str).map(str::to_owned),
                is_maker: Some(is_maker),
            });
        }
        Ok(trades)
    }

    fn cancel_all_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| {
            ExchangeError::bad_request(self.describe.id, "symbol required to cancel all orders on binance")
        })?;
        Ok(RequestSpec::new(HttpMethod::Delete, "/api/v3/openOrders")
            .signed()
            .param("symbol", &market.venue_id))
    }

    fn parse_canceled_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        self.parse_orders(body, market)
    }

    fn fetch_trading_fees_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/sapi/v1/asset/tradeFee").signed();
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_trading_fees(&self, body: Value, _market: Option<&Market>) -> Result<Vec<TradingFee>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("tradeFee"))?;
        rows.iter()
            .map(|row| {
                let venue_id = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
                let symbol = self.venue_symbol_heuristic(venue_id);
                Ok(TradingFee {
                    symbol,
                    maker: row.get("makerCommission").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default(),
                    taker: row.get("takerCommission").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default(),
                })
            })
            .collect()
    }

    fn ws_url(&self, private: bool, config: &ExchangeConfig) -> Result<Url, ExchangeError> {
        if private {
            let key = self.listen_key.lock().clone().ok_or_else(|| {
                ExchangeError::authentication(
                    self.describe.id,
                    "listenKey not primed; run listen_key_request() via Exchange::raw_request first",
                )
            })?;
            let base = if config.sandbox { "wss://testnet.binance.vision/ws" } else { "wss://stream.binance.com:9443/ws" };
            return Url::parse(&format!("{base}/{key}")).map_err(|e| ExchangeError::bad_request(self.describe.id, e.to_string()));
        }
        let base = if config.sandbox {
            "wss://testnet.binance.vision/stream"
        } else {
            "wss://stream.binance.com:9443/stream"
        };
        Url::parse(base).map_err(|e| ExchangeError::bad_request(self.describe.id, e.to_string()))
    }

    /// `DELETE /api/v3/userDataStream`, releasing the listenKey Binance
    /// otherwise keeps alive server-side until it expires on its own. Takes
    /// the stored key so a second `close_all_ws` call is a no-op.
    fn close_listen_key_request(&self) -> Option<RequestSpec> {
        let key = self.listen_key.lock().take()?;
        Some(RequestSpec::new(HttpMethod::Delete, LISTEN_KEY_PATH).signed().param("listenKey", key))
    }

    fn subscribe_frame(&self, topic: &str) -> String {
        serde_json::json!({ "method": "SUBSCRIBE", "params": [topic], "id": self.next_id() }).to_string()
    }

    fn topic_for(&self, channel: &str, symbol: Option<&CurrencyPair>) -> String {
        let suffix = if let Some(tf) = channel.strip_prefix("klines:") {
            format!("kline_{tf}")
        } else {
            match channel {
                "ticker" => "ticker".to_owned(),
                "orderbook" => "depth".to_owned(),
                "trades" => "aggTrade".to_owned(),
                other => other.to_owned(),
            }
        };
        match symbol {
            Some(symbol) => format!("{}@{suffix}", self.to_venue_symbol(symbol).to_lowercase()),
            None => suffix,
        }
    }

    /// Combined-stream frames arrive wrapped as `{"stream": "...", "data": ...}`;
    /// the raw user-data-stream socket instead sends bare event objects keyed
    /// by `"e"`, routed here to the `balance`/`orders` topics.
    fn demux(&self, frame: &WsFrame) -> DemuxOutcome {
        let text = match frame {
            WsFrame::Text(t) => t.clone(),
            WsFrame::Binary(_) => return DemuxOutcome::Ignore,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return DemuxOutcome::Ignore;
        };
        if let Some(stream) = value.get("stream").and_then(Value::as_str) {
            return DemuxOutcome::Topic(stream.to_owned(), value.get("data").cloned().unwrap_or(Value::Null));
        }
        match value.get("e").and_then(Value::as_str) {
            Some("outboundAccountPosition") | Some("balanceUpdate") => DemuxOutcome::Topic("balance".to_owned(), value),
            Some("executionReport") => DemuxOutcome::Topic("orders".to_owned(), value),
            _ => DemuxOutcome::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn adapter() -> BinanceAdapter {
        BinanceAdapter::new(Decimal::new(1, 3), Decimal::new(1, 3))
    }

    #[rstest]
    #[case(-2010, "", ExchangeErrorKind::InsufficientFunds)]
    #[case(-2011, "", ExchangeErrorKind::OrderNotFound)]
    #[case(-2013, "", ExchangeErrorKind::OrderNotFound)]
    #[case(-1121, "", ExchangeErrorKind::BadSymbol)]
    #[case(-1013, "", ExchangeErrorKind::InvalidOrder)]
    #[case(-9999, "Filter failure: LOT_SIZE", ExchangeErrorKind::InvalidOrder)]
    #[case(-9999, "Too many requests", ExchangeErrorKind::RateLimitExceeded)]
    #[case(-9999, "something else entirely", ExchangeErrorKind::Fault)]
    fn classify_code_maps_known_codes_and_messages(
        #[case] code: i64,
        #[case] message: &str,
        #[case] expected: ExchangeErrorKind,
    ) {
        assert_eq!(classify_code(code, message), expected);
    }

    fn config() -> ExchangeConfig {
        ExchangeConfig {
            api_key: Some("K".to_owned()),
            secret: Some("S".to_owned()),
            ..ExchangeConfig::default()
        }
    }

    #[test]
    fn sign_adds_api_key_header_and_signature_param() {
        let signed = adapter()
            .sign("/api/v3/account", HttpMethod::Get, vec![("omitZeroBalances".to_owned(), "true".to_owned())], &config())
            .expect("in test");
        assert_eq!(signed.headers, vec![("X-MBX-APIKEY".to_owned(), "K".to_owned())]);
        assert_eq!(signed.params.last().unwrap().0, "signature");
        assert!(signed.params.iter().any(|(k, _)| k == "timestamp"));
        assert!(signed.params.iter().any(|(k, _)| k == "recvWindow"));
    }

    #[test]
    fn sign_skips_hmac_for_listen_key_endpoint() {
        let signed = adapter().sign(LISTEN_KEY_PATH, HttpMethod::Post, vec![], &config()).expect("in test");
        assert!(signed.params.is_empty());
        assert_eq!(signed.headers, vec![("X-MBX-APIKEY".to_owned(), "K".to_owned())]);
    }

    #[test]
    fn close_listen_key_request_is_none_when_never_primed() {
        assert!(adapter().close_listen_key_request().is_none());
    }

    #[test]
    fn close_listen_key_request_deletes_and_clears_stored_key() {
        let adapter = adapter();
        adapter.store_listen_key("abc".to_owned());

        let spec = adapter.close_listen_key_request().expect("in test");
        assert_eq!(spec.method, HttpMethod::Delete);
        assert_eq!(spec.path, LISTEN_KEY_PATH);
        assert!(spec.params.iter().any(|(k, v)| k == "listenKey" && v == "abc"));

        assert!(adapter.close_listen_key_request().is_none());
    }

    #[test]
    fn unwrap_envelope_raises_insufficient_funds() {
        let body = serde_json::json!({"code": -2010, "msg": "Account has insufficient balance"});
        let err = adapter().unwrap_envelope(body).unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientFunds);
        assert_eq!(err.venue_code, Some(-2010));
        assert!(err.to_string().contains("binance"));
        assert!(err.to_string().contains("-2010"));
    }

    #[test]
    fn unwrap_envelope_passes_through_ordinary_bodies() {
        let body = serde_json::json!({"lastPrice": "30000.00"});
        assert_eq!(adapter().unwrap_envelope(body.clone()).unwrap(), body);
    }

    #[test]
    fn venue_symbol_heuristic_splits_known_quote() {
        let pair = adapter().venue_symbol_heuristic("BTCUSDT").expect("in test");
        assert_eq!(pair, CurrencyPair::new("BTC", "USDT"));
    }

    #[test]
    fn topic_for_ticker_is_lowercase_stream_name() {
        let topic = adapter().topic_for("ticker", Some(&CurrencyPair::new("BTC", "USDT")));
        assert_eq!(topic, "btcusdt@ticker");
    }

    #[test]
    fn topic_for_klines_maps_canonical_code() {
        let topic = adapter().topic_for("klines:1m", Some(&CurrencyPair::new("ETH", "USDT")));
        assert_eq!(topic, "ethusdt@kline_1m");
    }

    #[test]
    fn demux_routes_combined_stream_envelope() {
        let frame = WsFrame::Text(r#"{"stream":"btcusdt@ticker","data":{"c":"1"}}"#.to_owned());
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, payload) => {
                assert_eq!(topic, "btcusdt@ticker");
                assert_eq!(payload, serde_json::json!({"c": "1"}));
            }
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn demux_routes_user_data_execution_report_to_orders_topic() {
        let frame = WsFrame::Text(r#"{"e":"executionReport","s":"BTCUSDT"}"#.to_owned());
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, _) => assert_eq!(topic, "orders"),
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn parse_order_book_filters_zero_amount_levels() {
        let body = serde_json::json!({
            "lastUpdateId": 42,
            "bids": [["30000.00", "2.5"], ["29999.00", "0.0"]],
            "asks": [["30001.00", "1.5"]],
        });
        let market = Market::new("BTCUSDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let book = adapter().parse_order_book(body, &market).expect("in test");
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.nonce, Some(42));
    }

    #[test]
    fn parse_orders_infers_market_per_row_when_none_requested() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "orderId": 1, "side": "BUY", "type": "LIMIT", "status": "NEW",
             "price": "30000.00", "origQty": "1", "executedQty": "0", "time": 1700000000000i64},
            {"symbol": "ETHUSDT", "orderId": 2, "side": "SELL", "type": "MARKET", "status": "FILLED",
             "price": "0", "origQty": "2", "executedQty": "2", "time": 1700000000000i64},
        ]);
        let orders = adapter().parse_orders(body, None).expect("in test");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].symbol, CurrencyPair::new("BTC", "USDT"));
        assert_eq!(orders[1].symbol, CurrencyPair::new("ETH", "USDT"));
        assert_eq!(orders[1].status, OrderStatus::Filled);
    }

    #[test]
    fn parse_my_trades_derives_side_from_is_buyer() {
        let market = Market::new("BTCUSDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let body = serde_json::json!([
            {"id": 1, "price": "30000.00", "qty": "0.5", "time": 1700000000000i64,
             "isBuyer": true, "isMaker": false, "orderId": 9, "commission": "0.001", "commissionAsset": "BTC"},
        ]);
        let trades = adapter().parse_my_trades(body, Some(&market)).expect("in test");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[0].order_id.as_deref(), Some("9"));
    }

    #[test]
    fn cancel_all_orders_request_requires_symbol() {
        assert!(adapter().cancel_all_orders_request(None).is_err());
        let market = Market::new("BTCUSDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let spec = adapter().cancel_all_orders_request(Some(&market)).expect("in test");
        assert_eq!(spec.method, HttpMethod::Delete);
        assert_eq!(spec.path, "/api/v3/openOrders");
    }

    #[test]
    fn parse_trading_fees_reads_maker_taker_commission() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "makerCommission": "0.001", "takerCommission": "0.001"},
        ]);
        let fees = adapter().parse_trading_fees(body, None).expect("in test");
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].symbol, Some(CurrencyPair::new("BTC", "USDT")));
    }
}
