pub mod buckets;
pub mod params;
pub mod service;

pub use buckets::{
    Averages, DailyAverage, MonthlyAverage, TimeOfDayAverage, WeekdayAverage, WeeklyAverage,
};
pub use params::WeekdaySet;
pub use service::{
    Aggregator, DayProfile, DaySnapshot, PeriodAverage, ProfileDay, WeekProfile, WeekReadings,
};
