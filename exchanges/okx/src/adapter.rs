//! `VenueAdapter` for OKX spot (K-family signing).
//!
//! The signature covers `timestamp + METHOD + requestPath + body` where
//! `requestPath` includes the query string for GET/DELETE and `body` is the
//! exact JSON the pipeline will send for POST — so `sign` reconstructs both
//! exactly as `rest_client::build_request_parts` will, rather than letting
//! them drift out of step.

use std::collections::HashMap;
use std::time::Duration;

use mmb_core::config::ExchangeConfig;
use mmb_core::connectivity::WsFrame;
use mmb_core::signing::hmac_sha256_base64;
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
use rust_decimal::Decimal;
use serde_json::Value;
use url::Url;

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Mirrors `rest_client::build_request_parts`'s `BodyEncoding::JsonBody`
/// branch exactly, so the bytes signed here match the bytes dispatched.
fn json_body_string(params: &[(String, String)]) -> String {
    let object: serde_json::Map<String, Value> =
        params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    Value::Object(object).to_string()
}

fn millis_to_datetime(ms: i64) -> DateTime {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn classify_code(code: &str, message: &str) -> ExchangeErrorKind {
    match code {
        "50111" | "50113" | "50114" => ExchangeErrorKind::Authentication,
        "51001" => ExchangeErrorKind::BadSymbol,
        "51603" | "51000" => ExchangeErrorKind::OrderNotFound,
        "51008" | "51004" | "51006" => ExchangeErrorKind::InsufficientFunds,
        "51011" | "51010" | "51202" => ExchangeErrorKind::InvalidOrder,
        _ if message.to_lowercase().contains("rate limit") => ExchangeErrorKind::RateLimitExceeded,
        _ => ExchangeErrorKind::Fault,
    }
}

pub struct OkxAdapter {
    describe: Describe,
}

impl OkxAdapter {
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        let mut timeframes = HashMap::new();
        timeframes.insert(Timeframe::Second1, "1s");
        timeframes.insert(Timeframe::Minute1, "1m");
        timeframes.insert(Timeframe::Minute3, "3m");
        timeframes.insert(Timeframe::Minute5, "5m");
        timeframes.insert(Timeframe::Minute15, "15m");
        timeframes.insert(Timeframe::Minute30, "30m");
        timeframes.insert(Timeframe::Hour1, "1H");
        timeframes.insert(Timeframe::Hour2, "2H");
        timeframes.insert(Timeframe::Hour4, "4H");
        timeframes.insert(Timeframe::Hour6, "6H");
        timeframes.insert(Timeframe::Hour8, "8H");
        timeframes.insert(Timeframe::Hour12, "12H");
        timeframes.insert(Timeframe::Day1, "1D");
        timeframes.insert(Timeframe::Day3, "3D");
        timeframes.insert(Timeframe::Week1, "1W");
        timeframes.insert(Timeframe::Month1, "1M");

        let describe = Describe {
            id: "okx",
            version: "v5",
            has: ExchangeFeatures {
                fetch_ticker: true,
                fetch_order_book: true,
                fetch_trades: true,
                fetch_ohlcv: true,
                create_order: true,
                cancel_order: true,
                fetch_balance: true,
                watch_ticker: true,
                watch_order_book: true,
                watch_trades: true,
                watch_klines: true,
                watch_balance: true,
                watch_orders: true,
                fetch_tickers: true,
                cancel_all_orders: true,
                fetch_order: true,
                fetch_open_orders: true,
                fetch_closed_orders: true,
                fetch_my_trades: true,
                fetch_trading_fees: true,
                ..ExchangeFeatures::default()
            },
            urls: VenueUrls {
                rest: "https://www.okx.com".to_owned(),
                rest_sandbox: Some("https://www.okx.com".to_owned()),
                ws_public: "wss://ws.okx.com:8443/ws/v5/public".to_owned(),
                ws_private: Some("wss://ws.okx.com:8443/ws/v5/private".to_owned()),
                ws_public_sandbox: Some("wss://wspap.okx.com:8443/ws/v5/public?brokerId=9999".to_owned()),
                ws_private_sandbox: Some("wss://wspap.okx.com:8443/ws/v5/private?brokerId=9999".to_owned()),
            },
            rate_limit: RateLimitParams {
                capacity: 60,
                refill: 60,
                period: Duration::from_secs(2),
            },
            timeframes,
            maker_fee,
            taker_fee,
        };

        Self { describe }
    }

    fn bad_body(&self, field: &str) -> ExchangeError {
        ExchangeError::bad_request(self.describe.id, format!("response missing or malformed '{field}'"))
    }

    fn order_from_value(&self, row: Value, market: &Market) -> Result<Order, ExchangeError> {
        let text = |key: &str| row.get(key).and_then(Value::as_str);
        let dec = |key: &str| text(key).and_then(|s| s.parse::<Decimal>().ok());

        let side = if text("side") == Some("sell") { OrderSide::Sell } else { OrderSide::Buy };
        let order_type = match text("ordType") {
            Some("market") => OrderType::Market,
            Some("ioc") => OrderType::Ioc,
            Some("fok") => OrderType::Fok,
            _ => OrderType::Limit,
        };
        let status = match text("state") {
            Some("partially_filled") => OrderStatus::PartiallyFilled,
            Some("filled") => OrderStatus::Filled,
            Some("canceled") => OrderStatus::Canceled,
            _ => OrderStatus::New,
        };
        let ts = text("cTime").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

        Ok(Order {
            venue_id: text("ordId").unwrap_or_default().to_owned(),
            client_order_id: text("clOrdId").map(str::to_owned),
            symbol: market.symbol.clone(),
            side,
            order_type,
            time_in_force: Some(TimeInForce::GoodTillCancel),
            status,
            price: dec("px"),
            amount: dec("sz").unwrap_or_default(),
            filled: dec("accFillSz").unwrap_or_default(),
            cost: dec("fillNotionalUsd"),
            timestamp: millis_to_datetime(ts),
            fee: None,
            trades: None,
            info: row.clone(),
        })
    }

    /// Builds a per-row market when the caller asked for all symbols at once
    /// (`market` is `None`), mirroring how list endpoints echo `instId` per row.
    fn market_for_row(&self, row: &Value, market: Option<&Market>) -> Result<Market, ExchangeError> {
        if let Some(market) = market {
            return Ok(market.clone());
        }
        let venue_id = row.get("instId").and_then(Value::as_str).ok_or_else(|| self.bad_body("instId"))?;
        let symbol = self.venue_symbol_heuristic(venue_id).ok_or_else(|| self.bad_body("instId"))?;
        Ok(Market::new(venue_id, symbol, Value::Null))
    }
}

impl VenueAdapter for OkxAdapter {
    fn describe(&self) -> &Describe {
        &self.describe
    }

    fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        params: Vec<(String, String)>,
        config: &ExchangeConfig,
    ) -> Result<SignedRequest, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;
        let passphrase = config
            .passphrase
            .clone()
            .ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing passphrase"))?;

        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let query_goes_in_url = matches!(method, HttpMethod::Get | HttpMethod::Delete);

        let (request_path, body) = if query_goes_in_url {
            let request_path = if params.is_empty() { path.to_owned() } else { format!("{path}?{}", encode_query(&params)) };
            (request_path, String::new())
        } else {
            (path.to_owned(), json_body_string(&params))
        };

        let prehash = format!("{timestamp}{}{request_path}{body}", method.as_str());
        let signature = hmac_sha256_base64(secret.as_bytes(), prehash.as_bytes());

        let headers = vec![
            ("OK-ACCESS-KEY".to_owned(), api_key),
            ("OK-ACCESS-SIGN".to_owned(), signature),
            ("OK-ACCESS-TIMESTAMP".to_owned(), timestamp),
            ("OK-ACCESS-PASSPHRASE".to_owned(), passphrase),
        ];

        Ok(SignedRequest { params, headers, url_override: None })
    }

    fn body_encoding(&self, method: HttpMethod) -> BodyEncoding {
        match method {
            HttpMethod::Get | HttpMethod::Delete => BodyEncoding::QueryInUrl,
            HttpMethod::Post | HttpMethod::Put => BodyEncoding::JsonBody,
        }
    }

    fn on_http_error(&self, status: u16, body: &str) -> ExchangeError {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(kind) = self.classify_envelope(&value) {
                return kind;
            }
        }
        match status {
            401 | 403 => ExchangeError::authentication(self.describe.id, body),
            429 => ExchangeError::new(ExchangeErrorKind::RateLimitExceeded, self.describe.id, None, body),
            500..=599 => ExchangeError::new(ExchangeErrorKind::ExchangeNotAvailable, self.describe.id, None, body),
            _ => ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, body),
        }
    }

    /// OKX's top-level envelope is `{"code": "0", "msg": "", "data": [...]}`;
    /// a non-"0" code is a request-level failure, but batch endpoints can
    /// also report per-item failures in `data[].sCode` while the top-level
    /// code stays "0" — both are checked.
    fn unwrap_envelope(&self, body: Value) -> Result<Value, ExchangeError> {
        if let Some(err) = self.classify_envelope(&body) {
            return Err(err);
        }
        Ok(body)
    }

    fn venue_symbol_heuristic(&self, venue_id: &str) -> Option<CurrencyPair> {
        let (base, quote) = venue_id.split_once('-')?;
        Some(CurrencyPair::new(base, quote))
    }

    fn to_venue_symbol(&self, symbol: &CurrencyPair) -> String {
        format!("{}-{}", symbol.base, symbol.quote)
    }

    fn supports_order_type(&self, order_type: OrderType) -> bool {
        matches!(order_type, OrderType::Limit | OrderType::Market | OrderType::Ioc | OrderType::Fok)
    }

    fn fetch_time_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/api/v5/public/time")
    }

    fn parse_time(&self, body: Value) -> Result<DateTime, ExchangeError> {
        let ms = body
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("ts"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| self.bad_body("ts"))?;
        Ok(millis_to_datetime(ms))
    }

    fn load_markets_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/api/v5/public/instruments").param("instType", "SPOT")
    }

    fn parse_markets(&self, body: Value) -> Result<Vec<Market>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            let venue_id = row.get("instId").and_then(Value::as_str).unwrap_or_default();
            let base = row.get("baseCcy").and_then(Value::as_str).unwrap_or_default();
            let quote = row.get("quoteCcy").and_then(Value::as_str).unwrap_or_default();
            if venue_id.is_empty() || base.is_empty() || quote.is_empty() {
                continue;
            }
            let mut market = Market::new(venue_id, CurrencyPair::new(base, quote), row.clone());
            market.active = row.get("state").and_then(Value::as_str) == Some("live");
            if let Some(tick) = row.get("tickSz").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                market.precision.price = Some(tick.normalize().scale());
                market.price_tick = Some(tick);
            }
            if let Some(step) = row.get("lotSz").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                market.precision.amount = Some(step.normalize().scale());
                market.amount_step = Some(step);
            }
            markets.push(market);
        }
        Ok(markets)
    }

    fn fetch_ticker_request(&self, market: &Market) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v5/market/ticker").param("instId", &market.venue_id))
    }

    fn parse_ticker(&self, body: Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let row = body.get("data").and_then(|d| d.get(0)).ok_or_else(|| self.bad_body("data[0]"))?;
        let dec = |key: &str| row.get(key).and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok());
        Ok(Ticker {
            symbol: Some(market.symbol.clone()),
            last: dec("last"),
            bid: dec("bidPx"),
            bid_volume: dec("bidSz"),
            ask: dec("askPx"),
            ask_volume: dec("askSz"),
            high: dec("high24h"),
            low: dec("low24h"),
            open: dec("open24h"),
            close: dec("last"),
            base_volume: dec("vol24h"),
            quote_volume: dec("volCcy24h"),
            change: None,
            percentage: None,
            vwap: None,
            timestamp_ms: row.get("ts").and_then(Value::as_str).and_then(|s| s.parse().ok()),
        })
    }

    fn fetch_order_book_request(&self, market: &Market, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/market/books").param("instId", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("sz", limit);
        }
        Ok(spec)
    }

    fn parse_order_book(&self, body: Value, market: &Market) -> Result<OrderBook, ExchangeError> {
        let row = body.get("data").and_then(|d| d.get(0)).ok_or_else(|| self.bad_body("data[0]"))?;
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
        let bids = row.get("bids").and_then(Value::as_array).ok_or_else(|| self.bad_body("bids"))?;
        let asks = row.get("asks").and_then(Value::as_array).ok_or_else(|| self.bad_body("asks"))?;

        OrderBook::from_levels(market.symbol.clone(), parse_side(bids), parse_side(asks), OrderBookEventType::Snapshot)
            .map_err(|e| ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, format!("{e:?}")))
    }

    fn fetch_trades_request(&self, market: &Market, _since: Option<DateTime>, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/market/trades").param("instId", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_trades(&self, body: Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row.get("px").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("px"))?;
            let amount = row.get("sz").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("sz"))?;
            let ts = row.get("ts").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("ts"))?;
            let side = if row.get("side").and_then(Value::as_str) == Some("buy") { TradeSide::Buy } else { TradeSide::Sell };
            trades.push(Trade {
                venue_id: row.get("tradeId").and_then(Value::as_str).unwrap_or_default().to_owned(),
                symbol: market.symbol.clone(),
                side,
                price,
                amount,
                timestamp: millis_to_datetime(ts),
                order_id: None,
                fee: None,
                fee_currency: None,
                is_maker: None,
            });
        }
        Ok(trades)
    }

    fn fetch_ohlcv_request(
        &self,
        market: &Market,
        timeframe: Timeframe,
        _since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let bar = self
            .describe
            .timeframes
            .get(&timeframe)
            .copied()
            .ok_or_else(|| ExchangeError::bad_request(self.describe.id, format!("unsupported timeframe {timeframe}")))?;
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/market/candles")
            .param("instId", &market.venue_id)
            .param("bar", bar);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_candles(&self, body: Value) -> Result<Vec<Candle>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row.as_array().ok_or_else(|| self.bad_body("candle row"))?;
            let field = |i: usize| -> Result<Decimal, ExchangeError> {
                row.get(i).and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("candle field"))
            };
            let ts = row.first().and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("ts"))?;
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
        let (venue_type, time_in_force) = match order_type {
            OrderType::Limit => ("limit", None),
            OrderType::Market => ("market", None),
            OrderType::Ioc => ("ioc", None),
            OrderType::Fok => ("fok", None),
            other => {
                return Err(ExchangeError::invalid_order(self.describe.id, format!("okx does not support order type {other:?}")))
            }
        };

        let mut spec = RequestSpec::new(HttpMethod::Post, "/api/v5/trade/order")
            .signed()
            .param("instId", &market.venue_id)
            .param("tdMode", params.get("tdMode").and_then(Value::as_str).unwrap_or("cash"))
            .param("side", if side == OrderSide::Buy { "buy" } else { "sell" })
            .param("ordType", venue_type)
            .param("sz", amount);
        if let Some(price) = price {
            spec = spec.param("px", price);
        }
        if let Some(tif) = time_in_force {
            spec = spec.param("timeInForce", tif);
        }
        if let Some(client_id) = params.get("clOrdId").and_then(Value::as_str) {
            spec = spec.param("clOrdId", client_id);
        }
        Ok(spec)
    }

    fn parse_order(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        let row = body.get("data").and_then(|d| d.get(0)).unwrap_or(&body).clone();
        self.order_from_value(row, market)
    }

    fn cancel_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "instId required to cancel on okx"))?;
        Ok(RequestSpec::new(HttpMethod::Post, "/api/v5/trade/cancel-order")
            .signed()
            .param("instId", &market.venue_id)
            .param("ordId", id))
    }

    fn fetch_balance_request(&self) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v5/account/balance").signed())
    }

    fn parse_balance(&self, body: Value) -> Result<Balance, ExchangeError> {
        let mut balance = Balance::new(self.describe.id);
        if let Some(details) = body.get("data").and_then(|d| d.get(0)).and_then(|d| d.get("details")).and_then(Value::as_array) {
            for row in details {
                let Some(ccy) = row.get("ccy").and_then(Value::as_str) else { continue };
                let free = row.get("availBal").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default();
                let used = row.get("frozenBal").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default();
                if free == Decimal::ZERO && used == Decimal::ZERO {
                    continue;
                }
                balance.by_currency.insert(CurrencyCode::new(ccy), BalanceAmounts { free, used });
            }
        }
        balance.info = body;
        Ok(balance)
    }

    fn fetch_tickers_request(&self, _symbols: &[CurrencyPair]) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v5/market/tickers").param("instType", "SPOT"))
    }

    fn parse_tickers(&self, body: Value) -> Result<Vec<Ticker>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut tickers = Vec::with_capacity(rows.len());
        for row in rows {
            let venue_id = row.get("instId").and_then(Value::as_str).unwrap_or_default();
            let Some(symbol) = self.venue_symbol_heuristic(venue_id) else { continue };
            let market = Market::new(venue_id, symbol, Value::Null);
            let wrapped = serde_json::json!({ "data": [row] });
            tickers.push(self.parse_ticker(wrapped, &market)?);
        }
        Ok(tickers)
    }

    fn fetch_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "instId required to fetch an order on okx"))?;
        Ok(RequestSpec::new(HttpMethod::Get, "/api/v5/trade/order")
            .signed()
            .param("instId", &market.venue_id)
            .param("ordId", id))
    }

    fn fetch_open_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/trade/orders-pending").signed().param("instType", "SPOT");
        if let Some(market) = market {
            spec = spec.param("instId", &market.venue_id);
        }
        Ok(spec)
    }

    fn fetch_closed_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/trade/orders-history").signed().param("instType", "SPOT");
        if let Some(market) = market {
            spec = spec.param("instId", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let row_market = self.market_for_row(row, market)?;
            orders.push(self.order_from_value(row.clone(), &row_market)?);
        }
        Ok(orders)
    }

    fn fetch_my_trades_request(&self, market: Option<&Market>, _since: Option<DateTime>, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/trade/fills").signed().param("instType", "SPOT");
        if let Some(market) = market {
            spec = spec.param("instId", &market.venue_id);
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_my_trades(&self, body: Value, market: Option<&Market>) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let row_market = self.market_for_row(row, market)?;
            let price = row.get("fillPx").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("fillPx"))?;
            let amount = row.get("fillSz").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("fillSz"))?;
            let ts = row.get("ts").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("ts"))?;
            let side = if row.get("side").and_then(Value::as_str) == Some("sell") { TradeSide::Sell } else { TradeSide::Buy };
            let fee = row.get("fee").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).map(|f| f.abs());
            trades.push(Trade {
                venue_id: row.get("tradeId").and_then(Value::as_str).unwrap_or_default().to_owned(),
                symbol: row_market.symbol.clone(),
                side,
                price,
                amount,
                timestamp: millis_to_datetime(ts),
                order_id: row.get("ordId").and_then(Value::as_str).map(str::to_owned),
                fee,
                fee_currency: row.get("feeCcy").and_then(Value::as_str).map(str::to_owned),
                is_maker: row.get("execType").and_then(Value::as_str).map(|t| t == "M"),
            });
        }
        Ok(trades)
    }

    fn cancel_all_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "instId required to cancel all orders on okx"))?;
        Ok(RequestSpec::new(HttpMethod::Post, "/api/v5/trade/cancel-batch-orders").signed().param("instId", &market.venue_id))
    }

    fn parse_canceled_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        self.parse_orders(body, market)
    }

    fn fetch_trading_fees_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/api/v5/account/trade-fee").signed().param("instType", "SPOT");
        if let Some(market) = market {
            spec = spec.param("instId", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_trading_fees(&self, body: Value, _market: Option<&Market>) -> Result<Vec<TradingFee>, ExchangeError> {
        let rows = body.get("data").and_then(Value::as_array).ok_or_else(|| self.bad_body("data"))?;
        let mut fees = Vec::with_capacity(rows.len());
        for row in rows {
            let maker = row.get("maker").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default().abs();
            let taker = row.get("taker").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default().abs();
            let symbol = row.get("instId").and_then(Value::as_str).and_then(|id| self.venue_symbol_heuristic(id));
            fees.push(TradingFee { symbol, maker, taker });
        }
        Ok(fees)
    }

    fn ws_url(&self, private: bool, config: &ExchangeConfig) -> Result<Url, ExchangeError> {
        let urls = &self.describe.urls;
        let raw = match (private, config.sandbox) {
            (true, true) => urls.ws_private_sandbox.as_deref(),
            (true, false) => urls.ws_private.as_deref(),
            (false, true) => urls.ws_public_sandbox.as_deref(),
            (false, false) => Some(urls.ws_public.as_str()),
        };
        let raw = raw.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "venue has no websocket endpoint"))?;
        Url::parse(raw).map_err(|e| ExchangeError::bad_request(self.describe.id, e.to_string()))
    }

    /// OKX logs in over the same socket with a signed frame rather than a
    /// URL query, before any `subscribe` for private channels is sent.
    fn auth_frame(&self, config: &ExchangeConfig) -> Result<Option<String>, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;
        let passphrase = config.passphrase.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing passphrase"))?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let prehash = format!("{timestamp}GET/users/self/verify");
        let sign = hmac_sha256_base64(secret.as_bytes(), prehash.as_bytes());

        Ok(Some(
            serde_json::json!({
                "op": "login",
                "args": [{
                    "apiKey": api_key,
                    "passphrase": passphrase,
                    "timestamp": timestamp,
                    "sign": sign,
                }],
            })
            .to_string(),
        ))
    }

    fn subscribe_frame(&self, topic: &str) -> String {
        let (channel, inst_id) = topic.split_once(':').unwrap_or((topic, ""));
        let mut arg = serde_json::json!({ "channel": channel });
        if !inst_id.is_empty() {
            arg["instId"] = Value::String(inst_id.to_owned());
        }
        serde_json::json!({ "op": "subscribe", "args": [arg] }).to_string()
    }

    fn topic_for(&self, channel: &str, symbol: Option<&CurrencyPair>) -> String {
        let owned_channel;
        let okx_channel = match channel {
            "ticker" => "tickers",
            "orderbook" => "books",
            "trades" => "trades",
            other if other.starts_with("klines:") => {
                let bar = other
                    .strip_prefix("klines:")
                    .and_then(Timeframe::parse)
                    .and_then(|tf| self.describe.timeframes.get(&tf).copied())
                    .unwrap_or("1m");
                owned_channel = format!("candle{bar}");
                owned_channel.as_str()
            }
            "balance" => "account",
            "orders" => "orders",
            other => other,
        };
        match symbol {
            Some(symbol) => format!("{okx_channel}:{}", self.to_venue_symbol(symbol)),
            None => okx_channel.to_owned(),
        }
    }

    fn demux(&self, frame: &WsFrame) -> DemuxOutcome {
        let text = match frame {
            WsFrame::Text(t) => t.clone(),
            WsFrame::Binary(_) => return DemuxOutcome::Ignore,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return DemuxOutcome::Ignore;
        };
        if value.get("event").is_some() {
            return DemuxOutcome::Ignore;
        }
        let Some(arg) = value.get("arg") else { return DemuxOutcome::Ignore };
        let channel = arg.get("channel").and_then(Value::as_str).unwrap_or_default();
        let inst_id = arg.get("instId").and_then(Value::as_str);
        let topic = match inst_id {
            Some(inst_id) => format!("{channel}:{inst_id}"),
            None => channel.to_owned(),
        };
        DemuxOutcome::Topic(topic, value.get("data").cloned().unwrap_or(Value::Null))
    }
}

impl OkxAdapter {
    fn classify_envelope(&self, value: &Value) -> Option<ExchangeError> {
        let code = value.get("code").and_then(Value::as_str)?;
        if code == "0" {
            return None;
        }
        let message = value.get("msg").and_then(Value::as_str).unwrap_or_default().to_owned();
        Some(ExchangeError::new(classify_code(code, &message), self.describe.id, code.parse().ok(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn adapter() -> OkxAdapter {
        OkxAdapter::new(Decimal::new(8, 4), Decimal::new(1, 3))
    }

    #[rstest]
    #[case("50111", "", ExchangeErrorKind::Authentication)]
    #[case("50113", "", ExchangeErrorKind::Authentication)]
    #[case("51001", "", ExchangeErrorKind::BadSymbol)]
    #[case("51603", "", ExchangeErrorKind::OrderNotFound)]
    #[case("51008", "", ExchangeErrorKind::InsufficientFunds)]
    #[case("51011", "", ExchangeErrorKind::InvalidOrder)]
    #[case("99999", "Rate limit exceeded", ExchangeErrorKind::RateLimitExceeded)]
    #[case("99999", "unrecognized", ExchangeErrorKind::Fault)]
    fn classify_code_maps_known_codes(
        #[case] code: &str,
        #[case] message: &str,
        #[case] expected: ExchangeErrorKind,
    ) {
        assert_eq!(classify_code(code, message), expected);
    }

    fn config() -> ExchangeConfig {
        ExchangeConfig {
            api_key: Some("K".to_owned()),
            secret: Some("S".to_owned()),
            passphrase: Some("P".to_owned()),
            ..ExchangeConfig::default()
        }
    }

    #[test]
    fn sign_get_folds_query_into_request_path_and_empty_body() {
        let signed = adapter()
            .sign("/api/v5/account/balance", HttpMethod::Get, vec![("ccy".to_owned(), "BTC".to_owned())], &config())
            .expect("in test");
        assert_eq!(signed.headers.len(), 4);
        assert!(signed.headers.iter().any(|(k, _)| k == "OK-ACCESS-SIGN"));
        assert_eq!(signed.params, vec![("ccy".to_owned(), "BTC".to_owned())]);
    }

    #[test]
    fn unwrap_envelope_passes_through_success_code() {
        let body = serde_json::json!({"code": "0", "msg": "", "data": []});
        assert!(adapter().unwrap_envelope(body).is_ok());
    }

    #[test]
    fn unwrap_envelope_raises_bad_symbol() {
        let body = serde_json::json!({"code": "51001", "msg": "Instrument ID does not exist"});
        let err = adapter().unwrap_envelope(body).unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::BadSymbol);
    }

    #[test]
    fn venue_symbol_heuristic_splits_on_dash() {
        assert_eq!(adapter().venue_symbol_heuristic("BTC-USDT").unwrap(), CurrencyPair::new("BTC", "USDT"));
    }

    #[test]
    fn topic_for_uses_dash_symbol() {
        assert_eq!(adapter().topic_for("ticker", Some(&CurrencyPair::new("ETH", "USDT"))), "tickers:ETH-USDT");
    }

    /// Each requested timeframe must map to its own OKX candle channel, not
    /// always the 1-minute one.
    #[test]
    fn topic_for_klines_uses_requested_timeframe() {
        let pair = CurrencyPair::new("BTC", "USDT");
        assert_eq!(adapter().topic_for("klines:5m", Some(&pair)), "candle5m:BTC-USDT");
        assert_eq!(adapter().topic_for("klines:1h", Some(&pair)), "candle1H:BTC-USDT");
        assert_eq!(adapter().topic_for("klines:1m", Some(&pair)), "candle1m:BTC-USDT");
    }

    #[test]
    fn demux_extracts_channel_and_inst_id() {
        let frame = WsFrame::Text(r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{}]}"#.to_owned());
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, _) => assert_eq!(topic, "tickers:BTC-USDT"),
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn parse_orders_infers_market_per_row_when_none_requested() {
        let body = serde_json::json!({
            "code": "0",
            "msg": "",
            "data": [
                {"instId": "ETH-USDT", "ordId": "1", "side": "buy", "ordType": "limit", "state": "live", "px": "2000", "sz": "1", "accFillSz": "0", "cTime": "1700000000000"},
            ],
        });
        let orders = adapter().parse_orders(body, None).expect("in test");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, CurrencyPair::new("ETH", "USDT"));
    }

    #[test]
    fn parse_my_trades_reads_fill_fields() {
        let market = Market::new("BTC-USDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let body = serde_json::json!({
            "code": "0",
            "msg": "",
            "data": [
                {"tradeId": "9", "ordId": "1", "side": "sell", "fillPx": "30000", "fillSz": "0.1", "ts": "1700000000000", "fee": "-0.003", "feeCcy": "USDT", "execType": "M"},
            ],
        });
        let trades = adapter().parse_my_trades(body, Some(&market)).expect("in test");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].is_maker, Some(true));
        assert_eq!(trades[0].fee, Some(Decimal::new(3, 3)));
    }

    #[test]
    fn cancel_all_orders_request_requires_inst_id() {
        assert!(adapter().cancel_all_orders_request(None).is_err());
        let market = Market::new("BTC-USDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let spec = adapter().cancel_all_orders_request(Some(&market)).expect("in test");
        assert_eq!(spec.path, "/api/v5/trade/cancel-batch-orders");
    }

    #[test]
    fn parse_trading_fees_reads_maker_taker() {
        let body = serde_json::json!({
            "code": "0",
            "msg": "",
            "data": [{"instId": "BTC-USDT", "maker": "-0.0008", "taker": "-0.001"}],
        });
        let fees = adapter().parse_trading_fees(body, None).expect("in test");
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].maker, Decimal::new(8, 4));
        assert_eq!(fees[0].taker, Decimal::new(1, 3));
    }
}
