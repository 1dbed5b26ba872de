//! `VenueAdapter` for Gate.io spot.
//!
//! Signing hashes the body with plain SHA-512, then HMAC-SHA512-hexes the
//! five-line string `METHOD\nPATH\nQUERY\nSHA512(body)\nTIMESTAMP` — the
//! only family in this crate where the request body is folded in through a
//! nested digest rather than appended directly to the signed payload.

use std::collections::HashMap;
use std::time::Duration;

use mmb_core::config::ExchangeConfig;
use mmb_core::connectivity::{PingMode, WsFrame};
use mmb_core::signing::hmac_sha512_hex;
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
use sha2::{Digest, Sha512};
use serde_json::Value;

const API_PREFIX: &str = "/api/v4";

fn sha512_hex(body: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn json_body_string(params: &[(String, String)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let object: serde_json::Map<String, Value> =
        params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    Value::Object(object).to_string()
}

fn millis_to_datetime(ms: i64) -> DateTime {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Folds Gate's `label` string (present only on error) into the closed taxonomy.
fn classify_label(label: &str) -> ExchangeErrorKind {
    match label {
        "INVALID_KEY" | "INVALID_SIGNATURE" | "INVALID_CREDENTIALS" => ExchangeErrorKind::Authentication,
        "TOO_MANY_REQUESTS" => ExchangeErrorKind::RateLimitExceeded,
        "INVALID_CURRENCY_PAIR" | "CURRENCY_PAIR_NOT_FOUND" | "CURRENCY_NOT_SUPPORTED" => ExchangeErrorKind::BadSymbol,
        "BALANCE_NOT_ENOUGH" => ExchangeErrorKind::InsufficientFunds,
        "ORDER_NOT_FOUND" | "ORDER_CLOSED" => ExchangeErrorKind::OrderNotFound,
        "INVALID_PARAM_VALUE" | "INVALID_PROTOCOL" | "MISSING_REQUIRED_PARAMETER" | "INVALID_ARGUMENT" => {
            ExchangeErrorKind::BadRequest
        }
        "POC_FILL_IMMEDIATELY" | "ORDER_SIZE_TOO_SMALL" | "AMOUNT_TOO_LITTLE" => ExchangeErrorKind::InvalidOrder,
        _ => ExchangeErrorKind::Fault,
    }
}

pub struct GateAdapter {
    describe: Describe,
}

impl GateAdapter {
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        let mut timeframes = HashMap::new();
        timeframes.insert(Timeframe::Second1, "10s");
        timeframes.insert(Timeframe::Minute1, "1m");
        timeframes.insert(Timeframe::Minute5, "5m");
        timeframes.insert(Timeframe::Minute15, "15m");
        timeframes.insert(Timeframe::Minute30, "30m");
        timeframes.insert(Timeframe::Hour1, "1h");
        timeframes.insert(Timeframe::Hour4, "4h");
        timeframes.insert(Timeframe::Hour8, "8h");
        timeframes.insert(Timeframe::Day1, "1d");
        timeframes.insert(Timeframe::Day3, "3d");
        timeframes.insert(Timeframe::Week1, "7d");
        timeframes.insert(Timeframe::Month1, "30d");

        let describe = Describe {
            id: "gate",
            version: "v4",
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
                rest: "https://api.gateio.ws".to_owned(),
                rest_sandbox: None,
                ws_public: "wss://api.gateio.ws/ws/v4/".to_owned(),
                ws_private: Some("wss://api.gateio.ws/ws/v4/".to_owned()),
                ws_public_sandbox: None,
                ws_private_sandbox: None,
            },
            rate_limit: RateLimitParams {
                capacity: 200,
                refill: 200,
                period: Duration::from_secs(1),
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

    /// Gate returns the raw payload on success and `{label, message}` only
    /// on error; the *absence* of `label` is what signals success.
    fn classify_envelope(&self, value: &Value) -> Option<ExchangeError> {
        let label = value.get("label").and_then(Value::as_str)?;
        let message = value.get("message").and_then(Value::as_str).unwrap_or(label).to_owned();
        Some(ExchangeError::new(classify_label(label), self.describe.id, None, message))
    }

    fn order_from_value(&self, row: Value, market: &Market) -> Result<Order, ExchangeError> {
        let text = |key: &str| row.get(key).and_then(Value::as_str);
        let dec = |key: &str| text(key).and_then(|s| s.parse::<Decimal>().ok());

        let side = if text("side") == Some("sell") { OrderSide::Sell } else { OrderSide::Buy };
        let order_type = match text("type") {
            Some("market") => OrderType::Market,
            _ if text("time_in_force") == Some("poc") => OrderType::LimitMaker,
            _ => OrderType::Limit,
        };
        let status = match text("status") {
            Some("open") if dec("filled_total").unwrap_or_default() > Decimal::ZERO => OrderStatus::PartiallyFilled,
            Some("open") => OrderStatus::New,
            Some("closed") => OrderStatus::Filled,
            Some("cancelled") => OrderStatus::Canceled,
            _ => OrderStatus::New,
        };
        let time_in_force = text("time_in_force").map(|s| match s {
            "ioc" => TimeInForce::ImmediateOrCancel,
            "fok" => TimeInForce::FillOrKill,
            "poc" => TimeInForce::PostOnly,
            _ => TimeInForce::GoodTillCancel,
        });
        let ts = text("create_time").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

        Ok(Order {
            venue_id: text("id").unwrap_or_default().to_owned(),
            client_order_id: text("text").filter(|s| !s.is_empty() && *s != "apiv4").map(str::to_owned),
            symbol: market.symbol.clone(),
            side,
            order_type,
            time_in_force,
            status,
            price: dec("price"),
            amount: dec("amount").unwrap_or_default(),
            filled: dec("filled_total").unwrap_or_default(),
            cost: dec("filled_total").zip(dec("avg_deal_price")).map(|(f, p)| f * p),
            timestamp: millis_to_datetime(ts * 1000),
            fee: None,
            trades: None,
            info: row.clone(),
        })
    }

    /// Builds a per-row market when the caller asked across all symbols
    /// (`market` is `None`); list endpoints echo `currency_pair` per row.
    fn market_for_row(&self, row: &Value, market: Option<&Market>) -> Result<Market, ExchangeError> {
        if let Some(market) = market {
            return Ok(market.clone());
        }
        let venue_id = row.get("currency_pair").and_then(Value::as_str).ok_or_else(|| self.bad_body("currency_pair"))?;
        let symbol = self.venue_symbol_heuristic(venue_id).ok_or_else(|| self.bad_body("currency_pair"))?;
        Ok(Market::new(venue_id, symbol, Value::Null))
    }
}

impl VenueAdapter for GateAdapter {
    fn describe(&self) -> &Describe {
        &self.describe
    }

    /// `METHOD\nPATH\nQUERY\nSHA512(body)\nTIMESTAMP`,
    /// HMAC-SHA512 hex, `KEY`/`SIGN`/`Timestamp` headers.
    fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        params: Vec<(String, String)>,
        config: &ExchangeConfig,
    ) -> Result<SignedRequest, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;

        let timestamp = (mmb_utils::time::get_current_milliseconds() / 1000).to_string();
        let full_path = format!("{API_PREFIX}{path}");
        let (query, body) = match method {
            HttpMethod::Get | HttpMethod::Delete => (encode_query(&params), String::new()),
            HttpMethod::Post | HttpMethod::Put => (String::new(), json_body_string(&params)),
        };
        let body_hash = sha512_hex(body.as_bytes());

        let prehash = format!("{}\n{full_path}\n{query}\n{body_hash}\n{timestamp}", method.as_str());
        let signature = hmac_sha512_hex(secret.as_bytes(), prehash.as_bytes());

        let headers = vec![
            ("KEY".to_owned(), api_key),
            ("SIGN".to_owned(), signature),
            ("Timestamp".to_owned(), timestamp),
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
            if let Some(err) = self.classify_envelope(&value) {
                return err;
            }
        }
        match status {
            401 | 403 => ExchangeError::authentication(self.describe.id, body),
            429 => ExchangeError::new(ExchangeErrorKind::RateLimitExceeded, self.describe.id, None, body),
            500..=599 => ExchangeError::new(ExchangeErrorKind::ExchangeNotAvailable, self.describe.id, None, body),
            _ => ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, body),
        }
    }

    /// Gate's success envelope is the bare payload itself — there is no
    /// wrapper to unwrap, only an error shape to rule out first.
    fn unwrap_envelope(&self, body: Value) -> Result<Value, ExchangeError> {
        if let Some(err) = self.classify_envelope(&body) {
            return Err(err);
        }
        Ok(body)
    }

    fn to_venue_symbol(&self, symbol: &CurrencyPair) -> String {
        format!("{}_{}", symbol.base, symbol.quote)
    }

    fn venue_symbol_heuristic(&self, venue_id: &str) -> Option<CurrencyPair> {
        let (base, quote) = venue_id.split_once('_')?;
        Some(CurrencyPair::new(base, quote))
    }

    fn supports_order_type(&self, order_type: OrderType) -> bool {
        matches!(order_type, OrderType::Limit | OrderType::Market | OrderType::LimitMaker)
    }

    fn fetch_time_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/spot/time")
    }

    fn parse_time(&self, body: Value) -> Result<DateTime, ExchangeError> {
        let seconds = body.get("server_time").and_then(Value::as_i64).ok_or_else(|| self.bad_body("server_time"))?;
        Ok(millis_to_datetime(seconds))
    }

    fn load_markets_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/spot/currency_pairs")
    }

    fn parse_markets(&self, body: Value) -> Result<Vec<Market>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("currency_pairs"))?;
        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            let venue_id = row.get("id").and_then(Value::as_str).unwrap_or_default();
            let base = row.get("base").and_then(Value::as_str).unwrap_or_default();
            let quote = row.get("quote").and_then(Value::as_str).unwrap_or_default();
            if venue_id.is_empty() || base.is_empty() || quote.is_empty() {
                continue;
            }
            let mut market = Market::new(venue_id, CurrencyPair::new(base, quote), row.clone());
            market.active = row.get("trade_status").and_then(Value::as_str) == Some("tradable");
            market.precision.price = row.get("precision").and_then(Value::as_u64).map(|p| p as u32);
            market.precision.amount = row.get("amount_precision").and_then(Value::as_u64).map(|p| p as u32);
            if let Some(min) = row.get("min_base_amount").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                market.limits.amount.min = Some(min);
            }
            markets.push(market);
        }
        Ok(markets)
    }

    fn fetch_ticker_request(&self, market: &Market) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/spot/tickers").param("currency_pair", &market.venue_id))
    }

    fn parse_ticker(&self, body: Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let row = body.get(0).ok_or_else(|| self.bad_body("tickers[0]"))?;
        let dec = |key: &str| row.get(key).and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok());
        Ok(Ticker {
            symbol: Some(market.symbol.clone()),
            last: dec("last"),
            bid: dec("highest_bid"),
            bid_volume: None,
            ask: dec("lowest_ask"),
            ask_volume: None,
            high: dec("high_24h"),
            low: dec("low_24h"),
            open: None,
            close: dec("last"),
            base_volume: dec("base_volume"),
            quote_volume: dec("quote_volume"),
            change: None,
            percentage: dec("change_percentage"),
            vwap: None,
            timestamp_ms: None,
        })
    }

    fn fetch_order_book_request(&self, market: &Market, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/spot/order_book").param("currency_pair", &market.venue_id);
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

        let mut book = OrderBook::from_levels(
            market.symbol.clone(),
            parse_side(bids),
            parse_side(asks),
            OrderBookEventType::Snapshot,
        )
        .map_err(|e| ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, format!("{e:?}")))?;
        book.nonce = body.get("id").and_then(Value::as_u64);
        book.timestamp = body.get("current").and_then(Value::as_i64).map(millis_to_datetime);
        Ok(book)
    }

    fn fetch_trades_request(&self, market: &Market, _since: Option<DateTime>, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/spot/trades").param("currency_pair", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_trades(&self, body: Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("trades"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row.get("price").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("price"))?;
            let amount = row.get("amount").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("amount"))?;
            let ts = row
                .get("create_time_ms")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .map(|ms| ms as i64)
                .ok_or_else(|| self.bad_body("create_time_ms"))?;
            let side = if row.get("side").and_then(Value::as_str) == Some("buy") { TradeSide::Buy } else { TradeSide::Sell };
            trades.push(Trade {
                venue_id: row.get("id").and_then(Value::as_str).unwrap_or_default().to_owned(),
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
        since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let interval = self
            .describe
            .timeframes
            .get(&timeframe)
            .copied()
            .ok_or_else(|| ExchangeError::bad_request(self.describe.id, format!("unsupported timeframe {timeframe}")))?;
        let mut spec = RequestSpec::new(HttpMethod::Get, "/spot/candlesticks")
            .param("currency_pair", &market.venue_id)
            .param("interval", interval);
        if let Some(since) = since {
            spec = spec.param("from", since.timestamp());
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    /// Gate returns `[unix_seconds, quote_volume, close, high, low, open,
    /// base_volume, window_closed]` strings, a distinct column order from
    /// both Binance's and Bybit's kline rows.
    fn parse_candles(&self, body: Value) -> Result<Vec<Candle>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("candlesticks"))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row.as_array().ok_or_else(|| self.bad_body("candlestick row"))?;
            let field = |i: usize| -> Result<Decimal, ExchangeError> {
                row.get(i).and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("candlestick field"))
            };
            let ts = row
                .first()
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| self.bad_body("candlestick timestamp"))?;
            candles.push(Candle {
                timestamp: millis_to_datetime(ts * 1000),
                open: field(5)?,
                high: field(3)?,
                low: field(4)?,
                close: field(2)?,
                volume: field(6)?,
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
            OrderType::Limit | OrderType::LimitMaker => "limit",
            OrderType::Market => "market",
            other => return Err(ExchangeError::invalid_order(self.describe.id, format!("gate does not support order type {other:?}"))),
        };

        let mut spec = RequestSpec::new(HttpMethod::Post, "/spot/orders")
            .signed()
            .param("currency_pair", &market.venue_id)
            .param("side", if side == OrderSide::Buy { "buy" } else { "sell" })
            .param("type", venue_type)
            .param("amount", amount);

        if let Some(price) = price {
            spec = spec.param("price", price);
        }
        if order_type == OrderType::LimitMaker {
            spec = spec.param("time_in_force", "poc");
        }
        if let Some(text) = params.get("text").and_then(Value::as_str) {
            spec = spec.param("text", text);
        }
        Ok(spec)
    }

    fn parse_order(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        self.order_from_value(body, market)
    }

    fn cancel_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to cancel on gate"))?;
        Ok(RequestSpec::new(HttpMethod::Delete, &format!("/spot/orders/{id}"))
            .signed()
            .param("currency_pair", &market.venue_id))
    }

    fn fetch_balance_request(&self) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/spot/accounts").signed())
    }

    fn parse_balance(&self, body: Value) -> Result<Balance, ExchangeError> {
        let mut balance = Balance::new(self.describe.id);
        let rows = body.as_array().ok_or_else(|| self.bad_body("accounts"))?;
        for row in rows {
            let Some(currency) = row.get("currency").and_then(Value::as_str) else { continue };
            let free = row.get("available").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default();
            let used = row.get("locked").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default();
            if free.is_zero() && used.is_zero() {
                continue;
            }
            balance.by_currency.insert(CurrencyCode::new(currency), BalanceAmounts { free, used });
        }
        balance.info = body;
        Ok(balance)
    }

    fn fetch_tickers_request(&self, _symbols: &[CurrencyPair]) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/spot/tickers"))
    }

    fn parse_tickers(&self, body: Value) -> Result<Vec<Ticker>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("tickers"))?;
        let mut tickers = Vec::with_capacity(rows.len());
        for row in rows {
            let venue_id = row.get("currency_pair").and_then(Value::as_str).unwrap_or_default();
            let Some(symbol) = self.venue_symbol_heuristic(venue_id) else { continue };
            let market = Market::new(venue_id, symbol, Value::Null);
            tickers.push(self.parse_ticker(serde_json::json!([row]), &market)?);
        }
        Ok(tickers)
    }

    fn fetch_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to fetch an order on gate"))?;
        Ok(RequestSpec::new(HttpMethod::Get, &format!("/spot/orders/{id}")).signed().param("currency_pair", &market.venue_id))
    }

    fn fetch_open_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to list open orders on gate"))?;
        Ok(RequestSpec::new(HttpMethod::Get, "/spot/orders")
            .signed()
            .param("currency_pair", &market.venue_id)
            .param("status", "open"))
    }

    fn fetch_closed_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to list historical orders on gate"))?;
        Ok(RequestSpec::new(HttpMethod::Get, "/spot/orders")
            .signed()
            .param("currency_pair", &market.venue_id)
            .param("status", "finished"))
    }

    fn parse_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        let rows = body.as_array().ok_or_else(|| self.bad_body("orders"))?;
        rows.iter()
            .map(|row| {
                let row_market = self.market_for_row(row, market)?;
                self.order_from_value(row.clone(), &row_market)
            })
            .collect()
    }

    fn fetch_my_trades_request(&self, market: Option<&Market>, _since: Option<DateTime>, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to fetch fills on gate"))?;
        let mut spec = RequestSpec::new(HttpMethod::Get, "/spot/my_trades").signed().param("currency_pair", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_my_trades(&self, body: Value, market: Option<&Market>) -> Result<Vec<Trade>, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to fetch fills on gate"))?;
        let rows = body.as_array().ok_or_else(|| self.bad_body("trades"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row.get("price").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("price"))?;
            let amount = row.get("amount").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("amount"))?;
            let ts = row
                .get("create_time_ms")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .map(|ms| ms as i64)
                .ok_or_else(|| self.bad_body("create_time_ms"))?;
            let side = if row.get("side").and_then(Value::as_str) == Some("sell") { TradeSide::Sell } else { TradeSide::Buy };
            trades.push(Trade {
                venue_id: row.get("id").and_then(Value::as_str).unwrap_or_default().to_owned(),
                symbol: market.symbol.clone(),
                side,
                price,
                amount,
                timestamp: millis_to_datetime(ts),
                order_id: row.get("order_id").and_then(Value::as_str).map(str::to_owned),
                fee: row.get("fee").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                fee_currency: row.get("fee_currency").and_then(Value::as_str).map(str::to_owned),
                is_maker: row.get("role").and_then(Value::as_str).map(|r| r == "maker"),
            });
        }
        Ok(trades)
    }

    fn cancel_all_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "currency_pair required to cancel all orders on gate"))?;
        Ok(RequestSpec::new(HttpMethod::Delete, "/spot/orders").signed().param("currency_pair", &market.venue_id))
    }

    fn parse_canceled_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        self.parse_orders(body, market)
    }

    fn fetch_trading_fees_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/spot/fee").signed();
        if let Some(market) = market {
            spec = spec.param("currency_pair", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_trading_fees(&self, body: Value, market: Option<&Market>) -> Result<Vec<TradingFee>, ExchangeError> {
        let maker = body.get("maker_fee_rate").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default();
        let taker = body.get("taker_fee_rate").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default();
        Ok(vec![TradingFee { symbol: market.map(|m| m.symbol.clone()), maker, taker }])
    }

    fn ping_mode(&self, _private: bool) -> PingMode {
        PingMode::Application(serde_json::json!({ "channel": "spot.ping" }).to_string())
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    /// Gate's WS auth isn't a single login frame in the wire protocol (each
    /// private subscribe carries its own `auth` block); this adapter
    /// simplifies that into one dedicated `spot.login` handshake frame sent
    /// before the first private subscription, the same shape every other
    /// adapter's `auth_frame` produces.
    fn auth_frame(&self, config: &ExchangeConfig) -> Result<Option<String>, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;

        let timestamp = mmb_utils::time::get_current_milliseconds() / 1000;
        let prehash = format!("api\nspot.login\n\n{timestamp}");
        let signature = hmac_sha512_hex(secret.as_bytes(), prehash.as_bytes());

        Ok(Some(
            serde_json::json!({
                "time": timestamp,
                "channel": "spot.login",
                "event": "api",
                "payload": { "api_key": api_key, "signature": signature, "timestamp": timestamp.to_string() },
            })
            .to_string(),
        ))
    }

    /// `topic` is always `channel` or `channel:suffix` — the same string
    /// `demux` must reconstruct from each inbound frame so the subscription
    /// registry's topic-keyed dispatch queues actually receive traffic
    ///. The wire payload (which may
    /// need more than the suffix, e.g. order-book's fixed "100ms" interval)
    /// is rebuilt from the channel here rather than carried in the topic.
    fn subscribe_frame(&self, topic: &str) -> String {
        let (channel, suffix) = topic.split_once(':').unwrap_or((topic, ""));
        let payload: Vec<String> = match channel {
            "spot.order_book_update" => vec![suffix.to_owned(), "100ms".to_owned()],
            "spot.candlesticks" => match suffix.split_once('_') {
                Some((interval, symbol)) => vec![interval.to_owned(), symbol.to_owned()],
                None => vec![suffix.to_owned()],
            },
            _ if suffix.is_empty() => Vec::new(),
            _ => vec![suffix.to_owned()],
        };
        serde_json::json!({
            "time": mmb_utils::time::get_current_milliseconds() / 1000,
            "channel": channel,
            "event": "subscribe",
            "payload": payload,
        })
        .to_string()
    }

    fn topic_for(&self, channel: &str, symbol: Option<&CurrencyPair>) -> String {
        let venue_symbol = symbol.map(|s| self.to_venue_symbol(s)).unwrap_or_default();
        match channel {
            "ticker" => format!("spot.tickers:{venue_symbol}"),
            "orderbook" => format!("spot.order_book_update:{venue_symbol}"),
            "trades" => format!("spot.trades:{venue_symbol}"),
            other if other.starts_with("klines:") => {
                let interval = other.strip_prefix("klines:").unwrap_or("1m");
                let interval = Timeframe::parse(interval).and_then(|tf| self.describe.timeframes.get(&tf).copied()).unwrap_or("1m");
                format!("spot.candlesticks:{interval}_{venue_symbol}")
            }
            "balance" => "spot.balances".to_owned(),
            "orders" => format!("spot.orders:{venue_symbol}"),
            other => other.to_owned(),
        }
    }

    /// Every Gate data frame carries `channel` + `result`; `event == "update"`
    /// distinguishes pushed data from the `subscribe`/`login` acks, which
    /// carry no topic payload and are treated as heartbeats. The registry
    /// key is rebuilt to match `topic_for`: candlesticks from `result.n`
    /// (Gate's own `"{interval}_{currency_pair}"` label), balances from the
    /// bare channel, everything else from `result.currency_pair`.
    fn demux(&self, frame: &WsFrame) -> DemuxOutcome {
        let text = match frame {
            WsFrame::Text(t) => t.clone(),
            WsFrame::Binary(_) => return DemuxOutcome::Ignore,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return DemuxOutcome::Ignore;
        };
        if value.get("event").and_then(Value::as_str) != Some("update") {
            return DemuxOutcome::Heartbeat;
        }
        let Some(channel) = value.get("channel").and_then(Value::as_str) else {
            return DemuxOutcome::Ignore;
        };
        let result = value.get("result");
        let topic = match channel {
            "spot.balances" => channel.to_owned(),
            "spot.candlesticks" => {
                let label = result.and_then(|r| r.get("n")).and_then(Value::as_str).unwrap_or_default();
                format!("{channel}:{label}")
            }
            _ => {
                let symbol = result
                    .and_then(|r| r.get("currency_pair").or_else(|| r.get("s")))
                    .and_then(Value::as_str)
                    .or_else(|| {
                        result
                            .and_then(Value::as_array)
                            .and_then(|rows| rows.first())
                            .and_then(|row| row.get("currency_pair"))
                            .and_then(Value::as_str)
                    })
                    .unwrap_or_default();
                format!("{channel}:{symbol}")
            }
        };
        DemuxOutcome::Topic(topic, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn adapter() -> GateAdapter {
        GateAdapter::new(Decimal::new(2, 3), Decimal::new(2, 3))
    }

    #[rstest]
    #[case("INVALID_KEY", ExchangeErrorKind::Authentication)]
    #[case("INVALID_SIGNATURE", ExchangeErrorKind::Authentication)]
    #[case("TOO_MANY_REQUESTS", ExchangeErrorKind::RateLimitExceeded)]
    #[case("CURRENCY_PAIR_NOT_FOUND", ExchangeErrorKind::BadSymbol)]
    #[case("BALANCE_NOT_ENOUGH", ExchangeErrorKind::InsufficientFunds)]
    #[case("ORDER_NOT_FOUND", ExchangeErrorKind::OrderNotFound)]
    #[case("MISSING_REQUIRED_PARAMETER", ExchangeErrorKind::BadRequest)]
    #[case("ORDER_SIZE_TOO_SMALL", ExchangeErrorKind::InvalidOrder)]
    #[case("SOMETHING_UNKNOWN", ExchangeErrorKind::Fault)]
    fn classify_label_maps_known_labels(#[case] label: &str, #[case] expected: ExchangeErrorKind) {
        assert_eq!(classify_label(label), expected);
    }

    fn config() -> ExchangeConfig {
        ExchangeConfig {
            api_key: Some("K".to_owned()),
            secret: Some("S".to_owned()),
            ..ExchangeConfig::default()
        }
    }

    #[test]
    fn sign_get_produces_header_placement_with_query_folded_in() {
        let signed = adapter()
            .sign("/spot/orders", HttpMethod::Get, vec![("currency_pair".to_owned(), "BTC_USDT".to_owned())], &config())
            .expect("in test");
        assert_eq!(signed.headers.len(), 3);
        assert!(signed.headers.iter().any(|(k, _)| k == "KEY"));
        assert!(signed.headers.iter().any(|(k, _)| k == "SIGN"));
        assert_eq!(signed.params, vec![("currency_pair".to_owned(), "BTC_USDT".to_owned())]);
    }

    #[test]
    fn sha512_of_empty_body_matches_known_digest() {
        assert_eq!(
            sha512_hex(b""),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3"
        );
    }

    #[test]
    fn unwrap_envelope_raises_insufficient_funds() {
        let body = serde_json::json!({"label": "BALANCE_NOT_ENOUGH", "message": "not enough balance"});
        let err = adapter().unwrap_envelope(body).unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientFunds);
    }

    #[test]
    fn unwrap_envelope_passes_through_bare_success_payload() {
        let body = serde_json::json!({"id": "12345", "status": "closed"});
        let unwrapped = adapter().unwrap_envelope(body.clone()).expect("in test");
        assert_eq!(unwrapped, body);
    }

    #[test]
    fn to_venue_symbol_uses_underscore_separator() {
        assert_eq!(adapter().to_venue_symbol(&CurrencyPair::new("BTC", "USDT")), "BTC_USDT");
    }

    #[test]
    fn venue_symbol_heuristic_splits_on_underscore() {
        assert_eq!(adapter().venue_symbol_heuristic("ETH_USDT").unwrap(), CurrencyPair::new("ETH", "USDT"));
    }

    /// Column order is `[ts, quote_volume, close, high, low, open, base_volume, closed]`,
    /// distinct from Binance's and Bybit's — this guards against copy-pasting
    /// another adapter's index layout.
    #[test]
    fn parse_candles_reads_gate_specific_column_order() {
        let body = serde_json::json!([
            ["1700000000", "1000", "101", "102", "99", "100", "10", "true"]
        ]);
        let candles = adapter().parse_candles(body).expect("in test");
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, Decimal::new(100, 0));
        assert_eq!(candles[0].close, Decimal::new(101, 0));
        assert_eq!(candles[0].high, Decimal::new(102, 0));
        assert_eq!(candles[0].low, Decimal::new(99, 0));
        assert_eq!(candles[0].volume, Decimal::new(10, 0));
    }

    #[test]
    fn demux_routes_update_event_by_channel() {
        let frame = WsFrame::Text(
            r#"{"time":1,"channel":"spot.tickers","event":"update","result":{"currency_pair":"BTC_USDT"}}"#.to_owned(),
        );
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, _) => assert_eq!(topic, "spot.tickers:BTC_USDT"),
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn demux_treats_subscribe_ack_as_heartbeat() {
        let frame = WsFrame::Text(r#"{"time":1,"channel":"spot.tickers","event":"subscribe","result":{"status":"success"}}"#.to_owned());
        assert!(matches!(adapter().demux(&frame), DemuxOutcome::Heartbeat));
    }

    #[test]
    fn demux_candlestick_topic_matches_topic_for() {
        let frame = WsFrame::Text(
            r#"{"time":1,"channel":"spot.candlesticks","event":"update","result":{"n":"5m_BTC_USDT","c":"1"}}"#.to_owned(),
        );
        let expected = adapter().topic_for("klines:5m", Some(&CurrencyPair::new("BTC", "USDT")));
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, _) => assert_eq!(topic, expected),
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn topic_for_orderbook_includes_update_interval() {
        let topic = adapter().topic_for("orderbook", Some(&CurrencyPair::new("BTC", "USDT")));
        assert_eq!(topic, "spot.order_book_update:BTC_USDT");
    }

    #[test]
    fn topic_for_klines_uses_requested_interval() {
        let pair = CurrencyPair::new("BTC", "USDT");
        assert_eq!(adapter().topic_for("klines:5m", Some(&pair)), "spot.candlesticks:5m_BTC_USDT");
        assert_eq!(adapter().topic_for("klines:1h", Some(&pair)), "spot.candlesticks:1h_BTC_USDT");
    }

    #[test]
    fn subscribe_frame_rebuilds_orderbook_payload_from_topic() {
        let topic = adapter().topic_for("orderbook", Some(&CurrencyPair::new("BTC", "USDT")));
        let frame = adapter().subscribe_frame(&topic);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["channel"], "spot.order_book_update");
        assert_eq!(value["payload"], serde_json::json!(["BTC_USDT", "100ms"]));
    }

    #[test]
    fn subscribe_frame_rebuilds_candlestick_payload_from_topic() {
        let topic = adapter().topic_for("klines:5m", Some(&CurrencyPair::new("BTC", "USDT")));
        let frame = adapter().subscribe_frame(&topic);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["channel"], "spot.candlesticks");
        assert_eq!(value["payload"], serde_json::json!(["5m", "BTC_USDT"]));
    }

    #[test]
    fn subscribe_frame_balances_payload_is_empty() {
        let topic = adapter().topic_for("balance", None);
        let frame = adapter().subscribe_frame(&topic);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["channel"], "spot.balances");
        assert_eq!(value["payload"], serde_json::json!([]));
    }

    #[test]
    fn parse_orders_infers_market_per_row_when_none_requested() {
        let body = serde_json::json!([
            {"id": "1", "currency_pair": "ETH_USDT", "side": "buy", "type": "limit", "status": "open", "price": "2000", "amount": "1", "filled_total": "0", "create_time": "1700000000"},
        ]);
        let orders = adapter().parse_orders(body, None).expect("in test");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, CurrencyPair::new("ETH", "USDT"));
    }

    #[test]
    fn parse_my_trades_reads_role_and_fee_fields() {
        let market = Market::new("BTC_USDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let body = serde_json::json!([
            {"id": "9", "order_id": "1", "side": "sell", "price": "30000", "amount": "0.1", "create_time_ms": "1700000000000", "fee": "0.0003", "fee_currency": "USDT", "role": "maker"},
        ]);
        let trades = adapter().parse_my_trades(body, Some(&market)).expect("in test");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].is_maker, Some(true));
    }

    #[test]
    fn cancel_all_orders_request_requires_currency_pair() {
        assert!(adapter().cancel_all_orders_request(None).is_err());
        let market = Market::new("BTC_USDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let spec = adapter().cancel_all_orders_request(Some(&market)).expect("in test");
        assert_eq!(spec.path, "/spot/orders");
    }

    #[test]
    fn parse_trading_fees_reads_maker_taker_rate() {
        let body = serde_json::json!({"maker_fee_rate": "0.002", "taker_fee_rate": "0.002"});
        let fees = adapter().parse_trading_fees(body, None).expect("in test");
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].maker, Decimal::new(2, 3));
        assert_eq!(fees[0].symbol, None);
    }
}
