pub mod user;
pub mod vehicle;
pub mod trip;
pub mod booking;
pub mod rating;

pub use user::{NewUser, User, UserRole, VerificationStatus};
pub use vehicle::{NewVehicle, Vehicle};
pub use trip::{Actor, NewTrip, Trip, TripSearch, TripStatus};
pub use booking::{Booking, BookingStatus};
pub use rating::{NewRating, Rating, RatingSummary};
