pub mod food_parcel;
pub mod household;
pub mod outgoing_sms;
pub mod pickup_location;
