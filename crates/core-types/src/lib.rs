pub mod enums;
pub mod error;
pub mod status;
pub mod structs;
pub mod trigger;

// Re-export the core types to provide a clean public API.
pub use enums::{
    FuturesScope, InstrumentType, Network, OrderSide, OrderType, ScheduleType, ScheduledSwapStatus,
    ScheduledTradeStatus, SwapDirection, SwapExecutionStatus, SyncScope, TradeStatus, TriggerType,
};
pub use error::CoreError;
pub use status::{RemoteFlags, RemoteTradeState};
pub use structs::{
    Id, MarketData, NewScheduledSwap, NewScheduledTrade, NewSwap, NewSwapExecution, NewTrade, OrderParams,
    RemoteTrade, ScheduledSwap, ScheduledTrade, Swap, SwapExecution, Trade, User, VenueCredentials,
};
pub use trigger::{
    CalendarTrigger, MarketCondition, RecurringInterval, RecurringTrigger, SwapTrigger, TradeTrigger,
    percentage_target,
};
