use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub struct ExpectedValue<T: fmt::Debug> {
    value: Option<T>,
    what: &'static str,
}

impl<T: fmt::Debug> fmt::Display for ExpectedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Expected {}, got {:?}", self.what, self.value)
    }
}

impl<T: fmt::Debug> Error for ExpectedValue<T> {}

impl<T: fmt::Debug> ExpectedValue<T> {
    pub fn cast(value: Option<T>, what: &'static str) -> Result<T, Self> {
        match value {
            Some(v) => Ok(v),
            None => Err(Self { value, what }),
        }
    }
}

/// Structural errors: a requested mutation does not make sense for the current plan.
///
/// Infeasibility (capacity, energy, time windows) is never reported through this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingError {
    UnknownPair(usize),
    UnknownCustomer(usize),
    ForeignCustomer { customer: usize, pair: usize, owner: Option<usize> },
    CustomerNotRouted { customer: usize, pair: usize },
    DuplicateCustomer(usize),
    UnservedCustomer(usize),
    MalformedRoute { pair: usize, reason: String },
    MalformedTrip { pair: usize, trip: usize, reason: String },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownPair(pair) => write!(f, "Vehicle pair {pair} does not exist"),
            Self::UnknownCustomer(customer) => write!(f, "Customer {customer} does not exist"),
            Self::ForeignCustomer { customer, pair, owner } => match owner {
                Some(owner) => write!(
                    f,
                    "Customer {customer} belongs to vehicle pair {owner}, not to vehicle pair {pair}"
                ),
                None => write!(f, "Customer {customer} is not assigned to any vehicle pair (asked for {pair})"),
            },
            Self::CustomerNotRouted { customer, pair } => {
                write!(f, "Customer {customer} is not on any route of vehicle pair {pair}")
            }
            Self::DuplicateCustomer(customer) => write!(f, "Customer {customer} is served more than once"),
            Self::UnservedCustomer(customer) => write!(f, "Customer {customer} is not served"),
            Self::MalformedRoute { pair, reason } => write!(f, "Invalid truck route of vehicle pair {pair}: {reason}"),
            Self::MalformedTrip { pair, trip, reason } => {
                write!(f, "Invalid drone trip #{trip} of vehicle pair {pair}: {reason}")
            }
        }
    }
}

impl Error for RoutingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_value_cast() {
        assert_eq!(ExpectedValue::cast(Some(3), "number").ok(), Some(3));

        let err = ExpectedValue::<usize>::cast(None, "customer id").unwrap_err();
        assert_eq!(err.to_string(), "Expected customer id, got None");
    }

    #[test]
    fn test_foreign_customer_message() {
        let err = RoutingError::ForeignCustomer {
            customer: 4,
            pair: 1,
            owner: Some(0),
        };
        assert_eq!(
            err.to_string(),
            "Customer 4 belongs to vehicle pair 0, not to vehicle pair 1"
        );
    }
}
