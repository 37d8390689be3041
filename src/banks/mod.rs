//! One state machine per supported issuer, each implementing
//! [`crate::bank::BankParser`].

pub mod banque_populaire;
pub mod bnp;
pub mod cic;
pub mod lcl;
pub mod qonto;
pub mod societe_generale;
