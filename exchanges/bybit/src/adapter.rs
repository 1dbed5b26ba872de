//! `VenueAdapter` for Bybit v5 spot.
//!
//! Signing concatenates `timestamp + apiKey + recvWindow + (queryString or
//! jsonBody)`, HMAC-SHA256 hex, and places every field in headers rather
//! than in the signed payload itself.

use std::collections::HashMap;
use std::time::Duration;

use mmb_core::config::ExchangeConfig;
use mmb_core::connectivity::{PingMode, WsFrame};
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
use rust_decimal::Decimal;
use serde_json::Value;

const RECV_WINDOW_MS: u64 = 5000;
const ORDERBOOK_DEPTH: u32 = 50;

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn json_body_string(params: &[(String, String)]) -> String {
    let object: serde_json::Map<String, Value> =
        params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    Value::Object(object).to_string()
}

fn millis_to_datetime(ms: i64) -> DateTime {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Folds Bybit's numeric `retCode` into the closed taxonomy.
fn classify_code(code: i64, message: &str) -> ExchangeErrorKind {
    match code {
        10003 | 10004 | 10005 => ExchangeErrorKind::Authentication,
        10006 => ExchangeErrorKind::RateLimitExceeded,
        10001 => ExchangeErrorKind::BadRequest,
        110001 | 110025 => ExchangeErrorKind::OrderNotFound,
        110007 => ExchangeErrorKind::InsufficientFunds,
        110017 | 110020 | 110043 => ExchangeErrorKind::InvalidOrder,
        170131 => ExchangeErrorKind::BadSymbol,
        _ if message.to_lowercase().contains("too many visits") => ExchangeErrorKind::RateLimitExceeded,
        _ => ExchangeErrorKind::Fault,
    }
}

pub struct BybitAdapter {
    describe: Describe,
}

impl BybitAdapter {
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        let mut timeframes = HashMap::new();
        timeframes.insert(Timeframe::Minute1, "1");
        timeframes.insert(Timeframe::Minute3, "3");
        timeframes.insert(Timeframe::Minute5, "5");
        timeframes.insert(Timeframe::Minute15, "15");
        timeframes.insert(Timeframe::Minute30, "30");
        timeframes.insert(Timeframe::Hour1, "60");
        timeframes.insert(Timeframe::Hour2, "120");
        timeframes.insert(Timeframe::Hour4, "240");
        timeframes.insert(Timeframe::Hour6, "360");
        timeframes.insert(Timeframe::Hour12, "720");
        timeframes.insert(Timeframe::Day1, "D");
        timeframes.insert(Timeframe::Week1, "W");
        timeframes.insert(Timeframe::Month1, "M");

        let describe = Describe {
            id: "bybit",
            version: "v5",
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
                rest: "https://api.bybit.com".to_owned(),
                rest_sandbox: Some("https://api-testnet.bybit.com".to_owned()),
                ws_public: "wss://stream.bybit.com/v5/public/spot".to_owned(),
                ws_private: Some("wss://stream.bybit.com/v5/private".to_owned()),
                ws_public_sandbox: Some("wss://stream-testnet.bybit.com/v5/public/spot".to_owned()),
                ws_private_sandbox: Some("wss://stream-testnet.bybit.com/v5/private".to_owned()),
            },
            rate_limit: RateLimitParams {
                capacity: 120,
                refill: 120,
                period: Duration::from_secs(5),
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

    fn classify_envelope(&self, value: &Value) -> Option<ExchangeError> {
        let code = value.get("retCode").and_then(Value::as_i64)?;
        if code == 0 {
            return None;
        }
        let message = value.get("retMsg").and_then(Value::as_str).unwrap_or_default().to_owned();
        Some(ExchangeError::new(classify_code(code, &message), self.describe.id, Some(code), message))
    }

    /// Shared by `parse_order` and the order-list endpoints: Bybit returns
    /// the same order JSON shape from `/v5/order/create`, `/v5/order/realtime`,
    /// and `/v5/order/history`.
    fn order_from_value(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        let text = |key: &str| body.get(key).and_then(Value::as_str);
        let dec = |key: &str| text(key).and_then(|s| s.parse::<Decimal>().ok());

        let side = if text("side") == Some("Sell") { OrderSide::Sell } else { OrderSide::Buy };
        let order_type = match text("orderType") {
            Some("Market") => OrderType::Market,
            _ if text("timeInForce") == Some("PostOnly") => OrderType::LimitMaker,
            _ => OrderType::Limit,
        };
        let status = match text("orderStatus") {
            Some("PartiallyFilled") => OrderStatus::PartiallyFilled,
            Some("Filled") => OrderStatus::Filled,
            Some("Cancelled") | Some("PendingCancel") => OrderStatus::Canceled,
            Some("Rejected") => OrderStatus::Rejected,
            _ => OrderStatus::New,
        };
        let time_in_force = text("timeInForce").map(|s| match s {
            "IOC" => TimeInForce::ImmediateOrCancel,
            "FOK" => TimeInForce::FillOrKill,
            "PostOnly" => TimeInForce::PostOnly,
            _ => TimeInForce::GoodTillCancel,
        });
        let ts = text("createdTime").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

        Ok(Order {
            venue_id: text("orderId").unwrap_or_default().to_owned(),
            client_order_id: text("orderLinkId").filter(|s| !s.is_empty()).map(str::to_owned),
            symbol: market.symbol.clone(),
            side,
            order_type,
            time_in_force,
            status,
            price: dec("price"),
            amount: dec("qty").unwrap_or_default(),
            filled: dec("cumExecQty").unwrap_or_default(),
            cost: dec("cumExecValue"),
            timestamp: millis_to_datetime(ts),
            fee: None,
            trades: None,
            info: body,
        })
    }

    fn market_for_row(&self, row: &Value, market: Option<&Market>) -> Result<Market, ExchangeError> {
        if let Some(market) = market {
            return Ok(market.clone());
        }
        let venue_id = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
        let symbol = self
            .venue_symbol_heuristic(venue_id)
            .ok_or_else(|| ExchangeError::bad_symbol(self.describe.id, venue_id))?;
        Ok(Market::new(venue_id, symbol, Value::Null))
    }
}

impl VenueAdapter for BybitAdapter {
    fn describe(&self) -> &Describe {
        &self.describe
    }

    /// `timestamp + apiKey + recvWindow +
    /// (query or JSON body)`, HMAC-SHA256 hex, everything in headers.
    fn sign(
        &self,
        _path: &str,
        method: HttpMethod,
        params: Vec<(String, String)>,
        config: &ExchangeConfig,
    ) -> Result<SignedRequest, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;

        let timestamp = mmb_utils::time::get_current_milliseconds().to_string();
        let payload = match method {
            HttpMethod::Get | HttpMethod::Delete => encode_query(&params),
            HttpMethod::Post | HttpMethod::Put => json_body_string(&params),
        };

        let prehash = format!("{timestamp}{api_key}{RECV_WINDOW_MS}{payload}");
        let signature = hmac_sha256_hex(secret.as_bytes(), prehash.as_bytes());

        let headers = vec![
            ("X-BAPI-API-KEY".to_owned(), api_key),
            ("X-BAPI-SIGN".to_owned(), signature),
            ("X-BAPI-TIMESTAMP".to_owned(), timestamp),
            ("X-BAPI-RECV-WINDOW".to_owned(), RECV_WINDOW_MS.to_string()),
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

    /// Bybit's envelope is `{retCode, retMsg, result, retExtInfo, time}`;
    /// `retCode == 0` gates success and the payload lives in `result`.
    fn unwrap_envelope(&self, body: Value) -> Result<Value, ExchangeError> {
        if let Some(err) = self.classify_envelope(&body) {
            return Err(err);
        }
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    fn venue_symbol_heuristic(&self, venue_id: &str) -> Option<CurrencyPair> {
        const QUOTES: &[&str] = &["USDT", "USDC", "BTC", "ETH", "DAI", "EUR"];
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
        matches!(order_type, OrderType::Limit | OrderType::Market | OrderType::LimitMaker)
    }

    fn fetch_time_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/v5/market/time")
    }

    fn parse_time(&self, body: Value) -> Result<DateTime, ExchangeError> {
        let ms = body
            .get("timeSecond")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .map(|s| s * 1000)
            .ok_or_else(|| self.bad_body("timeSecond"))?;
        Ok(millis_to_datetime(ms))
    }

    fn load_markets_request(&self) -> RequestSpec {
        RequestSpec::new(HttpMethod::Get, "/v5/market/instruments-info").param("category", "spot")
    }

    fn parse_markets(&self, body: Value) -> Result<Vec<Market>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            let venue_id = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
            let base = row.get("baseCoin").and_then(Value::as_str).unwrap_or_default();
            let quote = row.get("quoteCoin").and_then(Value::as_str).unwrap_or_default();
            if venue_id.is_empty() || base.is_empty() || quote.is_empty() {
                continue;
            }
            let mut market = Market::new(venue_id, CurrencyPair::new(base, quote), row.clone());
            market.active = row.get("status").and_then(Value::as_str) == Some("Trading");
            if let Some(filter) = row.get("priceFilter") {
                if let Some(tick) = filter.get("tickSize").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                    market.precision.price = Some(tick.normalize().scale());
                    market.price_tick = Some(tick);
                }
            }
            if let Some(filter) = row.get("lotSizeFilter") {
                if let Some(step) = filter.get("basePrecision").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                    market.precision.amount = Some(step.normalize().scale());
                    market.amount_step = Some(step);
                }
                if let Some(min) = filter.get("minOrderQty").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()) {
                    market.limits.amount.min = Some(min);
                }
            }
            markets.push(market);
        }
        Ok(markets)
    }

    fn fetch_ticker_request(&self, market: &Market) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/v5/market/tickers")
            .param("category", "spot")
            .param("symbol", &market.venue_id))
    }

    fn parse_ticker(&self, body: Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let row = body.get("list").and_then(|l| l.get(0)).ok_or_else(|| self.bad_body("list[0]"))?;
        let dec = |key: &str| row.get(key).and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok());
        Ok(Ticker {
            symbol: Some(market.symbol.clone()),
            last: dec("lastPrice"),
            bid: dec("bid1Price"),
            bid_volume: dec("bid1Size"),
            ask: dec("ask1Price"),
            ask_volume: dec("ask1Size"),
            high: dec("highPrice24h"),
            low: dec("lowPrice24h"),
            open: dec("prevPrice24h"),
            close: dec("lastPrice"),
            base_volume: dec("volume24h"),
            quote_volume: dec("turnover24h"),
            change: None,
            percentage: dec("price24hPcnt"),
            vwap: None,
            timestamp_ms: body.get("time").and_then(Value::as_i64),
        })
    }

    fn fetch_order_book_request(&self, market: &Market, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/v5/market/orderbook")
            .param("category", "spot")
            .param("symbol", &market.venue_id)
            .param("limit", limit.unwrap_or(ORDERBOOK_DEPTH)))
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
        let bids = body.get("b").and_then(Value::as_array).ok_or_else(|| self.bad_body("b"))?;
        let asks = body.get("a").and_then(Value::as_array).ok_or_else(|| self.bad_body("a"))?;
        let nonce = body.get("u").and_then(Value::as_u64);

        let mut book = OrderBook::from_levels(
            market.symbol.clone(),
            parse_side(bids),
            parse_side(asks),
            OrderBookEventType::Snapshot,
        )
        .map_err(|e| ExchangeError::new(ExchangeErrorKind::Fault, self.describe.id, None, format!("{e:?}")))?;
        book.nonce = nonce;
        book.timestamp = body.get("ts").and_then(Value::as_i64).map(millis_to_datetime);
        Ok(book)
    }

    fn fetch_trades_request(&self, market: &Market, _since: Option<DateTime>, limit: Option<u32>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/market/recent-trade")
            .param("category", "spot")
            .param("symbol", &market.venue_id);
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_trades(&self, body: Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let price = row.get("price").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("price"))?;
            let amount = row.get("size").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("size"))?;
            let ts = row.get("time").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("time"))?;
            let side = if row.get("side").and_then(Value::as_str) == Some("Buy") { TradeSide::Buy } else { TradeSide::Sell };
            trades.push(Trade {
                venue_id: row.get("execId").and_then(Value::as_str).unwrap_or_default().to_owned(),
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
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/market/kline")
            .param("category", "spot")
            .param("symbol", &market.venue_id)
            .param("interval", interval);
        if let Some(since) = since {
            spec = spec.param("start", since.timestamp_millis());
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    /// Bybit returns klines newest-first as
    /// `[start, open, high, low, close, volume, turnover]` strings.
    fn parse_candles(&self, body: Value) -> Result<Vec<Candle>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row.as_array().ok_or_else(|| self.bad_body("kline row"))?;
            let field = |i: usize| -> Result<Decimal, ExchangeError> {
                row.get(i).and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("kline field"))
            };
            let ts = row.first().and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("start"))?;
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
            OrderType::Limit | OrderType::LimitMaker => "Limit",
            OrderType::Market => "Market",
            other => {
                return Err(ExchangeError::invalid_order(self.describe.id, format!("bybit does not support order type {other:?}")))
            }
        };

        let mut spec = RequestSpec::new(HttpMethod::Post, "/v5/order/create")
            .signed()
            .param("category", "spot")
            .param("symbol", &market.venue_id)
            .param("side", if side == OrderSide::Buy { "Buy" } else { "Sell" })
            .param("orderType", venue_type)
            .param("qty", amount);

        if let Some(price) = price {
            spec = spec.param("price", price);
        }
        if order_type == OrderType::LimitMaker {
            spec = spec.param("timeInForce", "PostOnly");
        }
        if let Some(client_id) = params.get("orderLinkId").and_then(Value::as_str) {
            spec = spec.param("orderLinkId", client_id);
        }
        Ok(spec)
    }

    fn parse_order(&self, body: Value, market: &Market) -> Result<Order, ExchangeError> {
        self.order_from_value(body, market)
    }

    /// A caller-supplied `category` in `params` (threaded through
    /// `createOrder`'s opaque `params` bag, not modeled on this trait's
    /// narrower `cancelOrder`) would override the default "spot" category
    /// here; absent that, "spot" is the only category this adapter trades,
    /// so it is hard-coded.
    fn cancel_order_request(&self, id: &str, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let market = market.ok_or_else(|| ExchangeError::bad_request(self.describe.id, "symbol required to cancel on bybit"))?;
        Ok(RequestSpec::new(HttpMethod::Post, "/v5/order/cancel")
            .signed()
            .param("category", "spot")
            .param("symbol", &market.venue_id)
            .param("orderId", id))
    }

    fn fetch_balance_request(&self) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/v5/account/wallet-balance").signed().param("accountType", "UNIFIED"))
    }

    fn parse_balance(&self, body: Value) -> Result<Balance, ExchangeError> {
        let mut balance = Balance::new(self.describe.id);
        let coins = body
            .get("list")
            .and_then(|l| l.get(0))
            .and_then(|a| a.get("coin"))
            .and_then(Value::as_array);
        if let Some(coins) = coins {
            for row in coins {
                let Some(coin) = row.get("coin").and_then(Value::as_str) else { continue };
                let total = row.get("walletBalance").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or_default();
                let free = row.get("availableToWithdraw").and_then(Value::as_str).and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(total);
                let used = (total - free).max(Decimal::ZERO);
                if total == Decimal::ZERO {
                    continue;
                }
                balance.by_currency.insert(CurrencyCode::new(coin), BalanceAmounts { free, used });
            }
        }
        balance.info = body;
        Ok(balance)
    }

    fn fetch_tickers_request(&self, _symbols: &[CurrencyPair]) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/v5/market/tickers").param("category", "spot"))
    }

    fn parse_tickers(&self, body: Value) -> Result<Vec<Ticker>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        rows.iter()
            .map(|row| {
                let market = self.market_for_row(row, None)?;
                self.parse_ticker(serde_json::json!({ "list": [row], "time": body.get("time") }), &market)
            })
            .collect()
    }

    fn fetch_order_request(&self, id: &str, _market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        Ok(RequestSpec::new(HttpMethod::Get, "/v5/order/realtime")
            .signed()
            .param("category", "spot")
            .param("orderId", id))
    }

    fn fetch_open_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/order/realtime").signed().param("category", "spot");
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        Ok(spec)
    }

    fn fetch_closed_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/order/history").signed().param("category", "spot");
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        rows.iter()
            .map(|row| {
                let row_market = self.market_for_row(row, market)?;
                self.order_from_value(row.clone(), &row_market)
            })
            .collect()
    }

    fn fetch_my_trades_request(
        &self,
        market: Option<&Market>,
        _since: Option<DateTime>,
        limit: Option<u32>,
    ) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/execution/list").signed().param("category", "spot");
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        if let Some(limit) = limit {
            spec = spec.param("limit", limit);
        }
        Ok(spec)
    }

    fn parse_my_trades(&self, body: Value, market: Option<&Market>) -> Result<Vec<Trade>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        rows.iter()
            .map(|row| {
                let row_market = self.market_for_row(row, market)?;
                let price = row.get("execPrice").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("execPrice"))?;
                let amount = row.get("execQty").and_then(Value::as_str).and_then(|s| s.parse().ok()).ok_or_else(|| self.bad_body("execQty"))?;
                let ts = row.get("execTime").and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| self.bad_body("execTime"))?;
                let side = if row.get("side").and_then(Value::as_str) == Some("Sell") { TradeSide::Sell } else { TradeSide::Buy };
                Ok(Trade {
                    venue_id: row.get("execId").and_then(Value::as_str).unwrap_or_default().to_owned(),
                    symbol: row_market.symbol,
                    side,
                    price,
                    amount,
                    timestamp: millis_to_datetime(ts),
                    order_id: row.get("orderId").and_then(Value::as_str).map(str::to_owned),
                    fee: row.get("execFee").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                    fee_currency: row.get("feeCurrency").and_then(Value::as_str).map(str::to_owned),
                    is_maker: row.get("isMaker").and_then(Value::as_bool),
                })
            })
            .collect()
    }

    fn cancel_all_orders_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Post, "/v5/order/cancel-all").signed().param("category", "spot");
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_canceled_orders(&self, body: Value, market: Option<&Market>) -> Result<Vec<Order>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        rows.iter()
            .map(|row| {
                let row_market = self.market_for_row(row, market)?;
                self.order_from_value(row.clone(), &row_market)
            })
            .collect()
    }

    fn fetch_trading_fees_request(&self, market: Option<&Market>) -> Result<RequestSpec, ExchangeError> {
        let mut spec = RequestSpec::new(HttpMethod::Get, "/v5/account/fee-rate").signed().param("category", "spot");
        if let Some(market) = market {
            spec = spec.param("symbol", &market.venue_id);
        }
        Ok(spec)
    }

    fn parse_trading_fees(&self, body: Value, _market: Option<&Market>) -> Result<Vec<TradingFee>, ExchangeError> {
        let rows = body.get("list").and_then(Value::as_array).ok_or_else(|| self.bad_body("list"))?;
        rows.iter()
            .map(|row| {
                let venue_id = row.get("symbol").and_then(Value::as_str).unwrap_or_default();
                Ok(TradingFee {
                    symbol: self.venue_symbol_heuristic(venue_id),
                    maker: row.get("makerFeeRate").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default(),
                    taker: row.get("takerFeeRate").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default(),
                })
            })
            .collect()
    }

    fn ping_mode(&self, _private: bool) -> PingMode {
        PingMode::Application(serde_json::json!({ "op": "ping" }).to_string())
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Sign base is the literal string `"GET/realtime" + expires`,
    /// HMAC-SHA256 hex.
    fn auth_frame(&self, config: &ExchangeConfig) -> Result<Option<String>, ExchangeError> {
        let api_key = config.api_key.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing api_key"))?;
        let secret = config.secret.clone().ok_or_else(|| ExchangeError::authentication(self.describe.id, "missing secret"))?;

        let expires = mmb_utils::time::get_current_milliseconds() + 10_000;
        let prehash = format!("GET/realtime{expires}");
        let signature = hmac_sha256_hex(secret.as_bytes(), prehash.as_bytes());

        Ok(Some(
            serde_json::json!({ "op": "auth", "args": [api_key, expires, signature] }).to_string(),
        ))
    }

    fn subscribe_frame(&self, topic: &str) -> String {
        serde_json::json!({ "op": "subscribe", "args": [topic] }).to_string()
    }

    fn topic_for(&self, channel: &str, symbol: Option<&CurrencyPair>) -> String {
        let venue_symbol = symbol.map(|s| self.to_venue_symbol(s));
        match channel {
            "ticker" => format!("tickers.{}", venue_symbol.unwrap_or_default()),
            "orderbook" => format!("orderbook.{ORDERBOOK_DEPTH}.{}", venue_symbol.unwrap_or_default()),
            "trades" => format!("publicTrade.{}", venue_symbol.unwrap_or_default()),
            other if other.starts_with("klines:") => {
                let interval = other.strip_prefix("klines:").unwrap_or("1m");
                let interval = Timeframe::parse(interval).and_then(|tf| self.describe.timeframes.get(&tf).copied()).unwrap_or("1");
                format!("kline.{interval}.{}", venue_symbol.unwrap_or_default())
            }
            "balance" => "wallet".to_owned(),
            "orders" => "order".to_owned(),
            other => other.to_owned(),
        }
    }

    /// Filters Bybit's `{"op":"pong",...}`/`{"op":"auth","success":true}`
    /// control frames out of the topic stream before falling back to the
    /// `topic`-keyed demux every other data frame uses.
    fn demux(&self, frame: &WsFrame) -> DemuxOutcome {
        let text = match frame {
            WsFrame::Text(t) => t.clone(),
            WsFrame::Binary(_) => return DemuxOutcome::Ignore,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return DemuxOutcome::Ignore;
        };
        if value.get("op").is_some() {
            return DemuxOutcome::Heartbeat;
        }
        match value.get("topic").and_then(Value::as_str) {
            Some(topic) => DemuxOutcome::Topic(topic.to_owned(), value),
            None => DemuxOutcome::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn adapter() -> BybitAdapter {
        BybitAdapter::new(Decimal::new(1, 4), Decimal::new(6, 4))
    }

    #[rstest]
    #[case(10003, "", ExchangeErrorKind::Authentication)]
    #[case(10004, "", ExchangeErrorKind::Authentication)]
    #[case(10005, "", ExchangeErrorKind::Authentication)]
    #[case(10006, "", ExchangeErrorKind::RateLimitExceeded)]
    #[case(110007, "", ExchangeErrorKind::InsufficientFunds)]
    #[case(110017, "", ExchangeErrorKind::InvalidOrder)]
    #[case(170131, "", ExchangeErrorKind::BadSymbol)]
    #[case(99999, "Too many visits!", ExchangeErrorKind::RateLimitExceeded)]
    #[case(99999, "nothing recognizable", ExchangeErrorKind::Fault)]
    fn classify_code_maps_known_ret_codes(
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
    fn sign_get_folds_query_into_prehash_and_uses_header_placement() {
        let signed = adapter()
            .sign("/v5/market/kline", HttpMethod::Get, vec![("symbol".to_owned(), "BTCUSDT".to_owned())], &config())
            .expect("in test");
        assert_eq!(signed.params, vec![("symbol".to_owned(), "BTCUSDT".to_owned())]);
        assert_eq!(signed.headers.len(), 4);
        assert!(signed.headers.iter().any(|(k, _)| k == "X-BAPI-SIGN"));
        assert!(signed.headers.iter().any(|(k, v)| k == "X-BAPI-RECV-WINDOW" && v == "5000"));
    }

    #[test]
    fn unwrap_envelope_raises_insufficient_funds() {
        let body = serde_json::json!({"retCode": 110007, "retMsg": "insufficient balance", "result": {}});
        let err = adapter().unwrap_envelope(body).unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientFunds);
        assert_eq!(err.venue_code, Some(110007));
    }

    #[test]
    fn unwrap_envelope_unwraps_result_on_success() {
        let body = serde_json::json!({"retCode": 0, "retMsg": "OK", "result": {"list": []}});
        let unwrapped = adapter().unwrap_envelope(body).expect("in test");
        assert_eq!(unwrapped, serde_json::json!({"list": []}));
    }

    #[test]
    fn venue_symbol_heuristic_splits_known_quote() {
        assert_eq!(adapter().venue_symbol_heuristic("ETHUSDT").unwrap(), CurrencyPair::new("ETH", "USDT"));
    }

    #[test]
    fn topic_for_orderbook_includes_depth() {
        let topic = adapter().topic_for("orderbook", Some(&CurrencyPair::new("BTC", "USDT")));
        assert_eq!(topic, "orderbook.50.BTCUSDT");
    }

    #[test]
    fn topic_for_klines_uses_requested_interval() {
        let pair = CurrencyPair::new("BTC", "USDT");
        assert_eq!(adapter().topic_for("klines:5m", Some(&pair)), "kline.5.BTCUSDT");
        assert_eq!(adapter().topic_for("klines:1h", Some(&pair)), "kline.60.BTCUSDT");
    }

    #[test]
    fn demux_filters_op_control_frames_as_heartbeat() {
        let frame = WsFrame::Text(r#"{"op":"pong"}"#.to_owned());
        assert!(matches!(adapter().demux(&frame), DemuxOutcome::Heartbeat));
    }

    #[test]
    fn demux_routes_topic_frame() {
        let frame = WsFrame::Text(r#"{"topic":"tickers.BTCUSDT","type":"snapshot","data":{}}"#.to_owned());
        match adapter().demux(&frame) {
            DemuxOutcome::Topic(topic, _) => assert_eq!(topic, "tickers.BTCUSDT"),
            _ => panic!("expected Topic outcome"),
        }
    }

    #[test]
    fn parse_order_book_filters_zero_amount_levels() {
        let body = serde_json::json!({
            "s": "BTCUSDT",
            "b": [["30000.00", "2.5"], ["29999.00", "0.0"]],
            "a": [["30001.00", "1.5"]],
            "u": 42,
            "ts": 1700000000000i64,
        });
        let market = Market::new("BTCUSDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let book = adapter().parse_order_book(body, &market).expect("in test");
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.nonce, Some(42));
    }

    #[test]
    fn parse_orders_infers_market_per_row_when_none_requested() {
        let body = serde_json::json!({"list": [
            {"symbol": "BTCUSDT", "orderId": "1", "side": "Buy", "orderType": "Limit", "orderStatus": "New",
             "price": "30000.00", "qty": "1", "cumExecQty": "0", "createdTime": "1700000000000"},
        ]});
        let orders = adapter().parse_orders(body, None).expect("in test");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, CurrencyPair::new("BTC", "USDT"));
    }

    #[test]
    fn parse_my_trades_reads_exec_fields() {
        let market = Market::new("BTCUSDT", CurrencyPair::new("BTC", "USDT"), Value::Null);
        let body = serde_json::json!({"list": [
            {"execId": "e1", "symbol": "BTCUSDT", "execPrice": "30000.00", "execQty": "0.5",
             "execTime": "1700000000000", "side": "Buy", "orderId": "9", "isMaker": true},
        ]});
        let trades = adapter().parse_my_trades(body, Some(&market)).expect("in test");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[0].is_maker, Some(true));
    }

    #[test]
    fn cancel_all_orders_request_scopes_to_spot_category() {
        let spec = adapter().cancel_all_orders_request(None).expect("in test");
        assert!(spec.params.iter().any(|(k, v)| k == "category" && v == "spot"));
    }

    #[test]
    fn parse_trading_fees_reads_maker_taker_rate() {
        let body = serde_json::json!({"list": [
            {"symbol": "BTCUSDT", "makerFeeRate": "0.0001", "takerFeeRate": "0.0006"},
        ]});
        let fees = adapter().parse_trading_fees(body, None).expect("in test");
        assert_eq!(fees.len(), 1);
        assert_eq!(fees[0].symbol, Some(CurrencyPair::new("BTC", "USDT")));
    }
}
