//! Form Encoding
//!
//! Stripe takes `application/x-www-form-urlencoded` bodies with bracketed keys
//! for nested fields (`shipping[address][city]`). Only fields that are present
//! are sent.

use bridge_core::{PaymentMethodParams, ShippingAddress};

/// Ordered form fields
pub type FormPairs = Vec<(String, String)>;

#[derive(Default)]
struct FormBuilder {
    pairs: FormPairs,
}

impl FormBuilder {
    fn field(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.pairs.push((key.to_owned(), value.to_string()));
        self
    }

    fn optional<T: ToString>(&mut self, key: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.field(key, value);
        }
        self
    }

    fn build(&mut self) -> FormPairs {
        std::mem::take(&mut self.pairs)
    }
}

/// Body for updating a customer's shipping. An empty address sends
/// `shipping=` which clears it.
pub fn shipping_form(shipping: &ShippingAddress) -> FormPairs {
    let mut form = FormBuilder::default();
    if shipping.is_empty() {
        return form.field("shipping", "").build();
    }

    form.optional("shipping[name]", shipping.name.as_deref())
        .optional("shipping[phone]", shipping.phone.as_deref())
        .optional("shipping[address][line1]", shipping.line1.as_deref())
        .optional("shipping[address][line2]", shipping.line2.as_deref())
        .optional("shipping[address][city]", shipping.city.as_deref())
        .optional("shipping[address][state]", shipping.state.as_deref())
        .optional("shipping[address][postal_code]", shipping.postal_code.as_deref())
        .optional("shipping[address][country]", shipping.country.as_deref())
        .build()
}

/// Body for creating a card payment method
pub fn payment_method_form(params: &PaymentMethodParams) -> FormPairs {
    let card = &params.card;
    let billing = &params.billing_details;

    FormBuilder::default()
        .field("type", params.kind())
        .optional("card[number]", card.number.as_deref())
        .optional("card[exp_month]", card.exp_month)
        .optional("card[exp_year]", card.exp_year)
        .optional("card[cvc]", card.cvc.as_deref())
        .optional("billing_details[name]", billing.name.as_deref())
        .optional("billing_details[email]", billing.email.as_deref())
        .build()
}

/// Body for a client-side payment intent confirmation
pub fn confirm_form(client_secret: &str, return_url: Option<&str>) -> FormPairs {
    FormBuilder::default()
        .field("client_secret", client_secret)
        .field("use_stripe_sdk", true)
        .optional("return_url", return_url)
        .build()
}
