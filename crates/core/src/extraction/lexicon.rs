//! Header and label vocabulary (English, German, French, Spanish, Dutch,
//! Italian). Entries are stored already folded by [`fold_label`].

use crate::domain::field::CanonicalField;

const CUSTOMER: &[&str] = &[
    "customer",
    "customer name",
    "client",
    "client name",
    "buyer",
    "account",
    "sold to",
    "bill to",
    "kunde",
    "kundenname",
    "auftraggeber",
    "nom du client",
    "cliente",
    "nombre del cliente",
    "klant",
    "klantnaam",
    "ragione sociale",
];

const SKU: &[&str] = &[
    "sku",
    "item code",
    "item number",
    "item no",
    "item",
    "product code",
    "product id",
    "part number",
    "part no",
    "article number",
    "article no",
    "code",
    "ref",
    "reference",
    "ean",
    "gtin",
    "upc",
    "artikelnummer",
    "artikel nr",
    "art nr",
    "materialnummer",
    "code article",
    "code produit",
    "codigo",
    "referencia",
    "artikelcode",
    "artikelnr",
    "codice",
    "codice articolo",
];

const DESCRIPTION: &[&str] = &[
    "description",
    "item description",
    "product",
    "product name",
    "name",
    "details",
    "bezeichnung",
    "beschreibung",
    "artikelbezeichnung",
    "designation",
    "libelle",
    "descripcion",
    "producto",
    "omschrijving",
    "descrizione",
    "prodotto",
];

const QUANTITY: &[&str] = &[
    "quantity",
    "qty",
    "quant",
    "pcs",
    "pieces",
    "menge",
    "anzahl",
    "stuck",
    "quantite",
    "qte",
    "cantidad",
    "cant",
    "aantal",
    "hoeveelheid",
    "quantita",
    "qta",
];

const UNIT_PRICE: &[&str] = &[
    "unit price",
    "price",
    "price each",
    "unit cost",
    "rate",
    "einzelpreis",
    "preis",
    "stuckpreis",
    "prix unitaire",
    "prix",
    "precio unitario",
    "precio",
    "prijs",
    "stukprijs",
    "eenheidsprijs",
    "prezzo unitario",
    "prezzo",
];

const LINE_TOTAL: &[&str] = &[
    "total",
    "line total",
    "amount",
    "extended price",
    "ext price",
    "net amount",
    "gesamtpreis",
    "gesamt",
    "betrag",
    "montant",
    "total ligne",
    "importe",
    "total linea",
    "totaal",
    "bedrag",
    "importo",
    "totale",
];

const CURRENCY: &[&str] =
    &["currency", "curr", "ccy", "wahrung", "devise", "moneda", "valuta"];

const UNIT: &[&str] = &[
    "unit",
    "uom",
    "unit of measure",
    "einheit",
    "me",
    "unite",
    "unidad",
    "eenheid",
    "unita",
    "um",
];

pub fn synonyms(field: CanonicalField) -> &'static [&'static str] {
    match field {
        CanonicalField::Customer => CUSTOMER,
        CanonicalField::Sku => SKU,
        CanonicalField::Description => DESCRIPTION,
        CanonicalField::Quantity => QUANTITY,
        CanonicalField::UnitPrice => UNIT_PRICE,
        CanonicalField::LineTotal => LINE_TOTAL,
        CanonicalField::Currency => CURRENCY,
        CanonicalField::Unit => UNIT,
    }
}

/// Document-level amount named by a total row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TotalKind {
    Subtotal,
    Tax,
    Total,
}

const SUBTOTAL_WORDS: &[&str] = &[
    "subtotal",
    "sub total",
    "net total",
    "zwischensumme",
    "nettosumme",
    "sous total",
    "total ht",
    "subtotaal",
    "subtotale",
];

const TAX_WORDS: &[&str] = &[
    "tax",
    "vat",
    "sales tax",
    "gst",
    "mwst",
    "ust",
    "steuer",
    "tva",
    "iva",
    "impuesto",
    "btw",
    "imposta",
];

const TOTAL_WORDS: &[&str] = &[
    "total",
    "grand total",
    "amount due",
    "summe",
    "gesamtsumme",
    "gesamtbetrag",
    "total ttc",
    "totaal",
    "totale",
];

/// Classifies a label cell as a total-row keyword. The earliest keyword in the
/// label decides ("Total incl. VAT" is a total, "VAT 20%" is tax); at equal
/// positions the longer phrase wins.
pub fn total_kind(label: &str) -> Option<TotalKind> {
    let folded = fold_label(label);
    if folded.is_empty() {
        return None;
    }
    let padded = format!(" {folded} ");
    [
        (TotalKind::Subtotal, SUBTOTAL_WORDS),
        (TotalKind::Tax, TAX_WORDS),
        (TotalKind::Total, TOTAL_WORDS),
    ]
    .into_iter()
    .flat_map(|(kind, words)| {
        let padded = &padded;
        words.iter().filter_map(move |word| {
            padded.find(&format!(" {word} ")).map(|position| (position, word.len(), kind))
        })
    })
    .min_by(|left, right| left.0.cmp(&right.0).then(right.1.cmp(&left.1)))
    .map(|(_, _, kind)| kind)
}

/// Lowercases, strips common Latin accents and reduces punctuation to single
/// spaces.
pub fn fold_label(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        let ch = match ch {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'ç' => 'c',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ñ' => 'n',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ß' => 's',
            other => other,
        };
        if ch.is_alphanumeric() {
            if pending_space && !folded.is_empty() {
                folded.push(' ');
            }
            pending_space = false;
            folded.push(ch);
        } else {
            pending_space = true;
        }
    }
    folded
}

/// Whole-word containment on folded text.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {phrase} "))
}

/// True when some field's vocabulary matches the label, exactly or as a whole
/// phrase.
pub fn keyword_hit(label: &str) -> bool {
    let folded = fold_label(label);
    !folded.is_empty()
        && CanonicalField::ALL
            .iter()
            .flat_map(|field| synonyms(*field).iter())
            .any(|word| folded == *word || contains_phrase(&folded, word))
}

/// If `text` starts with a customer label ("Customer:", "Kunde"), returns the
/// remainder after the label, which may be empty.
pub fn strip_customer_label(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let (label, rest) = match trimmed.find([':', '：']) {
        Some(index) => {
            let (label, rest) = trimmed.split_at(index);
            (label, rest.chars().skip(1).collect::<String>())
        }
        None => (trimmed, String::new()),
    };
    let folded = fold_label(label);
    CUSTOMER.contains(&folded.as_str()).then(|| rest.trim().to_string())
}
