use time::OffsetDateTime;

/// One meter sample as published on the queue.
///
/// On the wire the body is the decimal value and `ts` travels as an integer
/// unix-seconds message property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub value_kw: i64,
    pub ts: OffsetDateTime,
}

impl Reading {
    pub fn new(value_kw: i64, ts: OffsetDateTime) -> Self {
        Self { value_kw, ts }
    }

    pub fn body(&self) -> String {
        self.value_kw.to_string()
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.ts.unix_timestamp()
    }
}
